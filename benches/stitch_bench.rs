//! Multigrid stitch benchmark: a two-observation seam across a square
//! atlas, solved at the default knobs.

use criterion::{Criterion, criterion_group, criterion_main};
use glam::Vec3;

use regolith::backproject::IndexImage;
use regolith::backproject::index::TexelSource;
use regolith::pipeline::pool::WorkPool;
use regolith::stitch;
use regolith::{Raster, TexturingOptions};

fn seam_scene(n: u32) -> (Raster, IndexImage) {
    let mut atlas = Raster::new(n, n, 3).unwrap();
    let mut index = IndexImage::new(n, n);
    for row in 0..n {
        for col in 0..n {
            let (obs, value) = if col < n / 2 { (1000, 0.3) } else { (1001, 0.6) };
            atlas.set_rgb(row, col, Vec3::splat(value));
            index.set(row, col, TexelSource { obs_id: obs, row, col });
        }
    }
    (atlas, index)
}

fn bench_stitch(c: &mut Criterion) {
    let pool = WorkPool::new(0).unwrap();
    let options = TexturingOptions::default();
    for n in [128u32, 256] {
        let (atlas, index) = seam_scene(n);
        let flags = stitch::flags_from_index(&index);
        let owners = stitch::owners_from_index(&index);
        c.bench_function(&format!("stitch_seam_{n}"), |b| {
            b.iter(|| stitch::stitch(&pool, &options, &atlas, &flags, &owners).unwrap());
        });
    }
}

criterion_group!(benches, bench_stitch);
criterion_main!(benches);
