use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use ambientled::{
    color::{lerp, Color, Correction},
    updater::TargetFrame,
};

fn gradient(leds: usize) -> Vec<Color> {
    (0..leds)
        .map(|i| {
            let v = (i * 255 / leds.max(1)) as u8;
            Color::new(v, 255 - v, v / 2)
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    for leds in [60, 144, 300] {
        let target = TargetFrame::new(leds, Correction::default());
        target.publish(&gradient(leds));
        let mut displayed = vec![Color::default(); leds];

        c.bench_function(&format!("blend {} leds", leds), |b| {
            b.iter(|| {
                for (index, shown) in displayed.iter_mut().enumerate() {
                    *shown = lerp(target.get(index), *shown, black_box(0.5));
                }

                black_box(&displayed);
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
