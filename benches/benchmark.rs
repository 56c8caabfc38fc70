use camera_pose_calibration::correspondence::Correspondence;
use camera_pose_calibration::intrinsics::{Intrinsics, SensorIntrinsics};
use camera_pose_calibration::point_buffer::IndexedPointBuffer;
use camera_pose_calibration::pose::{PoseSolver, Projection};
use camera_pose_calibration::types::{Point3D, RvecTvec};
use criterion::{Criterion, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;

fn bench_pose_solve(c: &mut Criterion) {
    let intrinsics = Intrinsics::Sensor(SensorIntrinsics::full_frame(1920, 1080));
    let projection = Projection::from_intrinsics(&intrinsics, false).unwrap();
    let rt = RvecTvec::new(&[0.1, -0.2, 0.05], &[0.2, -0.1, 5.0]);
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let pairs: Vec<Correspondence> = (0..20)
        .map(|_| {
            let model = Point3D::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            Correspondence {
                image: projection.project(&rt, &model),
                model,
            }
        })
        .collect();

    let solver = PoseSolver::default();
    c.bench_function("pose_solve_20", |b| {
        b.iter(|| solver.solve(black_box(&pairs), black_box(&intrinsics)))
    });
}

fn bench_nearest_point(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut buffer = IndexedPointBuffer::new(1000);
    for _ in 0..1000 {
        buffer
            .add_point(glam::Vec3::new(
                rng.random_range(-10.0..10.0),
                rng.random_range(-10.0..10.0),
                rng.random_range(-10.0..10.0),
            ))
            .unwrap();
    }
    let query = glam::Vec3::new(0.5, -0.25, 1.0);

    c.bench_function("nearest_point_1000", |b| {
        b.iter(|| buffer.nearest_point(black_box(query)))
    });
}

criterion_group!(benches, bench_pose_solve, bench_nearest_point);
criterion_main!(benches);
