use std::env;

use anyhow::{Context, bail};
use less::{LessConfig, LessRegressor, ProcessGroup, TcpGroup};
use log::info;
use ndarray::{Array1, Array2, Axis, s};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, Uniform};
use tokio::net::TcpListener;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_SAMPLES: usize = 1000;
const DEFAULT_SEED: u64 = 42;
const N_FEATURES: usize = 5;

fn var_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value.parse().with_context(|| format!("invalid {key}: {value}")),
        Err(_) => Ok(default),
    }
}

/// A nonlinear target over uniform features, identical on every rank for the same seed.
fn synthetic(n: usize, seed: u64) -> anyhow::Result<(Array2<f64>, Array1<f64>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let features = Uniform::new(-3.0_f64, 3.0)?;
    let noise = Normal::new(0.0_f64, 0.1)?;

    let x = Array2::from_shape_simple_fn((n, N_FEATURES), || features.sample(&mut rng));
    let y = x.map_axis(Axis(1), |row| {
        row[0].sin() + row[1] * row[1] / 3.0 + row[2] * row[3] - 0.5 * row[4]
    });
    let y = y.mapv(|v| v + noise.sample(&mut rng));

    Ok((x, y))
}

async fn run<P: ProcessGroup>(group: &mut P, samples: usize, seed: u64) -> anyhow::Result<()> {
    let (x, y) = synthetic(samples, seed)?;
    let n_train = samples * 4 / 5;

    let (train_x, test_x) = (x.slice(s![..n_train, ..]), x.slice(s![n_train.., ..]));
    let (train_y, test_y) = (y.slice(s![..n_train]), y.slice(s![n_train..]));

    let config = LessConfig::new().random_state(seed);
    let mut less = LessRegressor::new(config)?;
    less.fit(group, train_x, train_y).await?;

    if !group.is_coordinator() {
        info!(rank = group.rank(); "fit done");
        return Ok(());
    }

    for diagnostic in less.diagnostics() {
        info!("{diagnostic}");
    }

    let pred = less.predict(test_x)?;
    let mse = (&pred - &test_y).mapv(|e| e * e).mean().unwrap_or(f64::NAN);

    info!(
        subsets:? = less.get_n_subsets(),
        neighbors:? = less.get_n_neighbors();
        "fit done"
    );
    println!("test MSE over {} rows: {mse:.6}", test_y.len());

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let rank: usize = var_or("RANK", 0)?;
    let size: usize = var_or("WORLD_SIZE", 1)?;
    let samples: usize = var_or("SAMPLES", DEFAULT_SAMPLES)?;
    let seed: u64 = var_or("SEED", DEFAULT_SEED)?;

    if size == 0 || rank >= size {
        bail!("RANK {rank} is out of range for WORLD_SIZE {size}");
    }

    if size == 1 {
        let mut group = less::in_memory(1).remove(0);
        return run(&mut group, samples, seed).await;
    }

    let host = env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port: u16 = env::var("PORT")
        .context("PORT is required with more than one rank")?
        .parse()
        .context("invalid PORT")?;

    let mut group = if rank == less::COORDINATOR {
        let listener = TcpListener::bind((host.as_str(), port)).await?;
        info!("listening at {host}:{port} for {} peers", size - 1);
        TcpGroup::listen(listener, size).await?
    } else {
        TcpGroup::connect((host.as_str(), port), rank, size).await?
    };

    run(&mut group, samples, seed).await
}
