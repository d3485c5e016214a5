use comms::CommsErr;
use futures::future::join_all;
use less::{
    Diagnostic, KMeans, LessConfig, LessErr, LessRegressor, LinearModel, LinearRegression,
    Regressor, Subsets,
};
use machine_learning::MlErr;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rand::{Rng, SeedableRng, rngs::StdRng};

const SENTINEL: f64 = 1e6;

fn wave(n: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(11);
    let x = Array2::from_shape_simple_fn((n, 3), || rng.random_range(-2.0_f64..2.0));
    let y = x.map_axis(Axis(1), |row| row[0].sin() + row[1] * row[2]);
    (x, y)
}

/// Fits the same configuration on every rank of an in memory group of `size` ranks.
async fn fit_all<L, G>(
    size: usize,
    config: LessConfig<L, G>,
    x: &Array2<f64>,
    y: &Array1<f64>,
) -> Vec<Result<LessRegressor<L, G>, LessErr>>
where
    L: Regressor + Clone,
    G: Regressor + Clone,
{
    let mut groups = less::in_memory(size);
    let fits = groups.iter_mut().map(|group| {
        let config = config.clone();
        async move {
            let mut less = LessRegressor::new(config)?;
            less.fit(group, x.view(), y.view()).await?;
            Ok::<_, LessErr>(less)
        }
    });

    join_all(fits).await
}

fn coordinator<L: Regressor, G: Regressor>(
    mut fits: Vec<Result<LessRegressor<L, G>, LessErr>>,
) -> LessRegressor<L, G> {
    fits.remove(0).unwrap()
}

/// Fails on any subset holding a sentinel target.
#[derive(Debug, Clone, Copy)]
struct Picky;

impl Regressor for Picky {
    type Model = LinearModel;

    fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        _: Option<u64>,
    ) -> machine_learning::Result<LinearModel> {
        if y.iter().any(|&v| v >= SENTINEL) {
            return Err(MlErr::InvalidParam {
                name: "y",
                detail: "sentinel target".to_string(),
            });
        }

        LinearRegression::new().fit(x, y, None)
    }
}

/// Shifts the intercept by an amount derived from its seed.
#[derive(Debug, Clone, Copy)]
struct Jitter;

impl Regressor for Jitter {
    type Model = LinearModel;

    fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        seed: Option<u64>,
    ) -> machine_learning::Result<LinearModel> {
        let mut model = LinearRegression::new().fit(x, y, None)?;
        model.intercept += seed.map_or(0.0, |seed| (seed % 1000) as f64 * 1e-6);
        Ok(model)
    }

    fn accepts_seed(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn neighborhoods_over_several_ranks() {
    let (x, y) = wave(100);
    let config = LessConfig::new().frac(0.2).n_replications(4).random_state(7);

    let mut fits = fit_all(3, config, &x, &y).await;
    let worker = fits.pop().unwrap().unwrap();
    let less = coordinator(fits);

    assert_eq!(less.get_n_neighbors(), Some(20));
    assert_eq!(less.get_n_subsets(), Some(Subsets::Fixed(5)));

    let ensemble = less.ensemble().unwrap();
    assert_eq!(ensemble.replications().len(), 4);
    for replication in ensemble.replications() {
        assert_eq!(replication.n_subsets(), 5);
        assert_eq!(replication.eval_size(), 100);
        assert!(replication.global().is_some());
    }

    let pred = less.predict(x.slice(s![..10, ..])).unwrap();
    assert_eq!(pred.len(), 10);
    assert!(pred.iter().all(|p| p.is_finite()));

    assert!(!worker.is_fitted());
    assert!(matches!(
        worker.predict(x.slice(s![..10, ..])),
        Err(LessErr::NotFitted)
    ));
}

#[tokio::test]
async fn validation_split_sizes_every_replication() {
    let (x, y) = wave(100);
    let config = LessConfig::new()
        .val_size(0.3)
        .n_replications(5)
        .random_state(1);

    let less = coordinator(fit_all(2, config, &x, &y).await);
    let ensemble = less.ensemble().unwrap();

    assert_eq!(ensemble.replications().len(), 5);
    assert!(ensemble.replications().iter().all(|r| r.eval_size() == 30));
    assert_eq!(less.get_val_size(), Some(0.3));
}

#[tokio::test]
async fn single_cluster_without_validation_runs_once() {
    let (x, y) = wave(60);
    let config = LessConfig::new()
        .cluster_method(KMeans::new(1))
        .n_replications(10)
        .random_state(2);

    let less = coordinator(fit_all(2, config, &x, &y).await);
    let ensemble = less.ensemble().unwrap();

    assert_eq!(ensemble.replications().len(), 1);
    assert_eq!(less.get_n_replications(), 1);

    let replication = &ensemble.replications()[0];
    assert!(replication.global().is_none());
    assert_eq!(replication.n_subsets(), 1);
    assert_eq!(less.get_n_subsets(), Some(Subsets::PerReplication(vec![1])));

    let pred = less.predict(x.view()).unwrap();
    let direct = LinearRegression::new()
        .fit(x.view(), y.view(), None)
        .unwrap();
    let expected = machine_learning::Predict::predict(&direct, x.view()).unwrap();
    assert!(
        pred.iter()
            .zip(&expected)
            .all(|(p, e)| (p - e).abs() < 1e-9)
    );
}

#[tokio::test]
async fn more_ranks_than_subsets() {
    let (x, y) = wave(60);
    let config = LessConfig::new()
        .n_subsets(3)
        .n_replications(2)
        .random_state(4);

    let wide = coordinator(fit_all(8, config.clone(), &x, &y).await);
    let narrow = coordinator(fit_all(1, config, &x, &y).await);

    let ensemble = wide.ensemble().unwrap();
    assert!(ensemble.replications().iter().all(|r| r.locals().len() == 3));
    assert_eq!(wide.get_n_neighbors(), Some(20));
    assert_eq!(wide.ensemble(), narrow.ensemble());
}

#[tokio::test]
async fn results_do_not_depend_on_the_rank_count() {
    let (x, y) = wave(80);
    let config = LessConfig::new()
        .frac(0.1)
        .val_size(0.25)
        .n_replications(3)
        .random_state(9)
        .local_estimator(Jitter);

    let one = coordinator(fit_all(1, config.clone(), &x, &y).await);
    let two = coordinator(fit_all(2, config.clone(), &x, &y).await);
    let five = coordinator(fit_all(5, config, &x, &y).await);

    assert_eq!(one.ensemble(), two.ensemble());
    assert_eq!(one.ensemble(), five.ensemble());

    let x0 = x.slice(s![..7, ..]);
    assert_eq!(one.predict(x0).unwrap(), five.predict(x0).unwrap());
}

#[tokio::test]
async fn random_state_drives_every_draw() {
    let (x, y) = wave(80);
    let config = |seed| {
        LessConfig::new()
            .frac(0.1)
            .n_replications(3)
            .random_state(seed)
    };

    let a = coordinator(fit_all(2, config(3), &x, &y).await);
    let b = coordinator(fit_all(2, config(3), &x, &y).await);
    let c = coordinator(fit_all(2, config(4), &x, &y).await);

    assert_eq!(a.ensemble(), b.ensemble());
    assert_ne!(a.ensemble(), c.ensemble());
}

#[tokio::test]
async fn failing_local_fit_fails_every_rank() {
    // Along a line, the 49 nearest of 50 points always hold the middle one.
    let x = Array2::from_shape_fn((50, 1), |(i, _)| i as f64);
    let mut y = x.column(0).mapv(|v| 2.0 * v);
    y[25] = SENTINEL;

    let config = LessConfig::new()
        .n_neighbors(49)
        .n_subsets(4)
        .n_replications(2)
        .random_state(0)
        .local_estimator(Picky);

    let fits = fit_all(3, config, &x, &y).await;

    assert!(fits.iter().all(Result::is_err));
    assert!(matches!(fits[0], Err(LessErr::Ml(MlErr::InvalidParam { .. }))));
}

#[tokio::test]
async fn invalid_data_on_a_worker_fails_every_rank() {
    let (x, y) = wave(30);
    let mut bad = x.clone();
    bad[[4, 2]] = f64::NAN;

    let mut groups = less::in_memory(3);
    let fits = groups.iter_mut().enumerate().map(|(rank, group)| {
        let x = if rank == 1 { &bad } else { &x };
        let y = &y;
        async move {
            let mut less = LessRegressor::new(LessConfig::new().random_state(1))?;
            less.fit(group, x.view(), y.view()).await?;
            Ok::<_, LessErr>(less)
        }
    });
    let fits = join_all(fits).await;

    assert!(matches!(
        fits[0],
        Err(LessErr::Comms(CommsErr::Aborted { rank: 1, .. }))
    ));
    assert!(matches!(fits[1], Err(LessErr::InvalidInput { .. })));
    assert!(matches!(
        fits[2],
        Err(LessErr::Comms(CommsErr::Aborted { rank: 0, .. }))
    ));
}

#[tokio::test]
async fn ranks_must_hold_the_same_data() {
    let (x, y) = wave(30);
    let mut other = y.clone();
    other[0] += 1.0;

    let mut groups = less::in_memory(2);
    let fits = groups.iter_mut().enumerate().map(|(rank, group)| {
        let y = if rank == 1 { &other } else { &y };
        let x = &x;
        async move {
            let mut less = LessRegressor::new(LessConfig::new().random_state(1))?;
            less.fit(group, x.view(), y.view()).await?;
            Ok::<_, LessErr>(less)
        }
    });
    let fits = join_all(fits).await;

    assert!(matches!(fits[0], Err(LessErr::InvalidInput { .. })));
    assert!(matches!(fits[1], Err(LessErr::Comms(CommsErr::Aborted { .. }))));
}

#[tokio::test]
async fn shared_ensembles_predict_on_every_rank() {
    let (x, y) = wave(90);
    let config = LessConfig::new()
        .frac(0.2)
        .n_replications(2)
        .random_state(5)
        .share_ensemble(true);

    let fits: Vec<_> = fit_all(3, config, &x, &y)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let x0 = x.slice(s![..5, ..]);
    let expected = fits[0].predict(x0).unwrap();
    for less in &fits[1..] {
        assert_eq!(less.ensemble(), fits[0].ensemble());
        assert_eq!(less.predict(x0).unwrap(), expected);
    }
}

#[tokio::test]
async fn clustering_with_validation() {
    let (x, y) = wave(100);
    let config = LessConfig::new()
        .cluster_method(KMeans::new(4))
        .val_size(0.2)
        .n_replications(3)
        .random_state(8);

    let less = coordinator(fit_all(2, config, &x, &y).await);

    let Some(Subsets::PerReplication(counts)) = less.get_n_subsets() else {
        panic!("clustering counts subsets per replication");
    };
    assert_eq!(counts.len(), 3);
    assert!(counts.iter().all(|&c| (1..=4).contains(&c)));
    assert_eq!(less.get_n_neighbors(), None);

    let ensemble = less.ensemble().unwrap();
    assert!(ensemble.replications().iter().all(|r| r.eval_size() == 20));

    let pred = less.predict(x.slice(s![..10, ..])).unwrap();
    assert!(pred.iter().all(|p| p.is_finite()));
}

#[tokio::test]
async fn stochastic_clustering_without_validation() {
    let (x, y) = wave(90);
    let config = LessConfig::new()
        .cluster_method(KMeans::new(4))
        .n_replications(3)
        .random_state(6);

    let one = coordinator(fit_all(1, config.clone(), &x, &y).await);
    let three = coordinator(fit_all(3, config, &x, &y).await);

    let ensemble = three.ensemble().unwrap();
    assert_eq!(ensemble.replications().len(), 3);

    let Some(Subsets::PerReplication(counts)) = three.get_n_subsets() else {
        panic!("clustering counts subsets per replication");
    };
    let locals: Vec<_> = ensemble
        .replications()
        .iter()
        .map(|r| r.locals().len())
        .collect();
    assert_eq!(counts, locals);
    assert!(ensemble.replications().iter().all(|r| r.eval_size() == 90));

    assert_eq!(one.ensemble(), three.ensemble());
}

/// A kernel that weighs every row with zero.
fn flat_kernel(points: ArrayView2<f64>, _: ArrayView1<f64>) -> Array1<f64> {
    Array1::zeros(points.nrows())
}

#[tokio::test]
async fn zero_kernel_rows_get_uniform_weights() {
    let (x, y) = wave(60);
    let config = LessConfig::new()
        .n_replications(2)
        .random_state(3)
        .distance_function(flat_kernel);

    let less = coordinator(fit_all(2, config, &x, &y).await);

    for replication in 0..2 {
        assert!(less.diagnostics().contains(&Diagnostic::ZeroDistanceRows {
            replication,
            rows: 60,
        }));
    }

    let pred = less.predict(x.slice(s![..10, ..])).unwrap();
    assert_eq!(pred.len(), 10);
    assert!(pred.iter().all(|p| p.is_finite()));
}

#[tokio::test]
async fn mismatched_columns_are_rejected_at_predict() {
    let (x, y) = wave(40);
    let less = coordinator(fit_all(1, LessConfig::new().random_state(2), &x, &y).await);

    let res = less.predict(Array2::zeros((3, 2)).view());
    assert!(matches!(
        res,
        Err(LessErr::SizeMismatch {
            what: "features",
            got: 2,
            expected: 3
        })
    ));
}

#[tokio::test]
async fn fits_run_on_spawned_tasks() {
    let (x, y) = wave(50);

    let mut tasks = tokio::task::JoinSet::new();
    for mut group in less::in_memory(2) {
        let (x, y) = (x.clone(), y.clone());
        tasks.spawn(async move {
            let mut less = LessRegressor::new(LessConfig::new().random_state(2))?;
            less.fit(&mut group, x.view(), y.view()).await?;
            Ok::<_, LessErr>(less.is_fitted())
        });
    }

    let fitted: Vec<bool> = tasks
        .join_all()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(fitted.iter().filter(|&&f| f).count(), 1);
}
