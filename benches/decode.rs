//! Micro-benchmarks for the decode hot path
//!
//! Covers the quantized dot kernels that dominate matrix-vector time, one
//! full forward step of a small transformer, and the sampling pipeline.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use inferir::generate::ForwardModel;
use inferir::gguf::{ModelConfig, QuantType, TensorView};
use inferir::sampler::TokenSampler;
use inferir::tensor::QuantizedTensor;
use inferir::transformer::{InferenceState, LayerWeights, QuantizedTransformer};

const DOT_LEN: usize = 4096;

fn pseudo_random(seed: u32, len: usize) -> Vec<f32> {
    let mut lcg = seed;
    (0..len)
        .map(|_| {
            lcg = lcg.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (lcg >> 16) as f32 / 65_536.0 - 0.5
        })
        .collect()
}

fn q8_0_bytes(blocks: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(blocks * 34);
    for b in 0..blocks {
        out.extend_from_slice(&half::f16::from_f32(0.02).to_le_bytes());
        for i in 0..32u32 {
            out.push(((i * 7 + b as u32 * 13) % 256) as u8);
        }
    }
    out
}

fn q4_0_bytes(blocks: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(blocks * 18);
    for b in 0..blocks {
        out.extend_from_slice(&half::f16::from_f32(0.05).to_le_bytes());
        for i in 0..16u32 {
            out.push(((i * 11 + b as u32 * 5) % 256) as u8);
        }
    }
    out
}

fn benchmark_dot_kernels(c: &mut Criterion) {
    let x = pseudo_random(1, DOT_LEN);
    let mut group = c.benchmark_group("dot_4096");

    let owned = QuantizedTensor::from_f32(pseudo_random(2, DOT_LEN));
    group.bench_function("f32_owned", |b| {
        b.iter(|| black_box(owned.dot(0, black_box(&x), 0, DOT_LEN)));
    });

    let q8_data = q8_0_bytes(DOT_LEN / 32);
    let q8 = QuantizedTensor::from_view(TensorView::new(&q8_data, QuantType::Q8_0, DOT_LEN).unwrap());
    group.bench_function("q8_0", |b| {
        b.iter(|| black_box(q8.dot(0, black_box(&x), 0, DOT_LEN)));
    });

    let q4_data = q4_0_bytes(DOT_LEN / 32);
    let q4 = QuantizedTensor::from_view(TensorView::new(&q4_data, QuantType::Q4_0, DOT_LEN).unwrap());
    group.bench_function("q4_0", |b| {
        b.iter(|| black_box(q4.dot(0, black_box(&x), 0, DOT_LEN)));
    });

    group.finish();
}

fn bench_model() -> QuantizedTransformer<'static> {
    let config = ModelConfig {
        architecture: "llama".to_string(),
        vocab_size: 512,
        embedding_dim: 64,
        num_layers: 4,
        num_heads: 4,
        num_kv_heads: 2,
        head_dim: 16,
        ffn_dim: 128,
        context_length: 256,
        rms_eps: 1e-5,
        rope_theta: 10_000.0,
    };
    let dim = config.embedding_dim;
    let kv_dim = config.kv_dim();
    let weights = |rows: usize, cols: usize, seed: u32| {
        QuantizedTensor::from_f32(pseudo_random(seed, rows * cols))
    };
    let layers = (0..config.num_layers)
        .map(|i| {
            let seed = i as u32 * 100;
            LayerWeights {
                attn_norm: vec![1.0; dim],
                attn_q: weights(dim, dim, seed + 1),
                attn_k: weights(kv_dim, dim, seed + 2),
                attn_v: weights(kv_dim, dim, seed + 3),
                attn_output: weights(dim, dim, seed + 4),
                ffn_norm: vec![1.0; dim],
                ffn_gate: weights(config.ffn_dim, dim, seed + 5),
                ffn_up: weights(config.ffn_dim, dim, seed + 6),
                ffn_down: weights(dim, config.ffn_dim, seed + 7),
            }
        })
        .collect();
    QuantizedTransformer {
        token_embedding: weights(config.vocab_size, dim, 8),
        layers,
        output_norm: vec![1.0; dim],
        output_weight: weights(config.vocab_size, dim, 9),
        config,
    }
}

fn benchmark_forward_step(c: &mut Criterion) {
    let model = bench_model();
    let mut group = c.benchmark_group("forward_step");

    for &position in &[0usize, 64, 192] {
        group.bench_with_input(
            BenchmarkId::from_parameter(position),
            &position,
            |b, &position| {
                let mut state = InferenceState::new(&model.config);
                // Warm the cache up to the benchmarked position
                for p in 0..position {
                    model.forward((p % 512) as u32, p, &mut state).unwrap();
                    state.advance();
                }
                b.iter(|| {
                    let logits = model.forward(black_box(3), position, &mut state).unwrap();
                    black_box(logits[0])
                });
            },
        );
    }

    group.finish();
}

fn benchmark_sampling(c: &mut Criterion) {
    let logits = pseudo_random(42, 32_000);
    let mut group = c.benchmark_group("sample_32k_vocab");

    group.bench_function("greedy", |b| {
        let mut sampler = TokenSampler::new(0.0, 0.95, 1);
        b.iter(|| black_box(sampler.sample(black_box(&logits))));
    });

    group.bench_function("categorical", |b| {
        let mut sampler = TokenSampler::new(0.8, 1.0, 1);
        b.iter(|| black_box(sampler.sample(black_box(&logits))));
    });

    group.bench_function("nucleus_top_p", |b| {
        let mut sampler = TokenSampler::new(0.8, 0.9, 1);
        b.iter(|| black_box(sampler.sample(black_box(&logits))));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_dot_kernels,
    benchmark_forward_step,
    benchmark_sampling
);
criterion_main!(benches);
