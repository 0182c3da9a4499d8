use gace::{
    BlockingEvaluator, DesignPoint, EnvConfig, Evaluator, EvaluatorError, EvaluatorParams,
    PerformanceReport, PoolConfig, Registry,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::{Duration, Instant};

const CONFIG: &str = r#"{
    "metrics": [
        { "name": "gain",  "comparator": ">=", "target": 60.0, "tolerance": 5.0,
          "low": 0.0, "high": 120.0, "sample": [40.0, 80.0] },
        { "name": "power", "comparator": "<=", "target": 1e-3, "tolerance": 1e-4,
          "low": 1e-6, "high": 1e-2, "log": true }
    ],
    "parameters": [
        { "name": "W",  "low": 1e-6, "high": 100e-6, "log": true },
        { "name": "Ib", "low": 1e-6, "high": 50e-6 }
    ],
    "random_target": true,
    "seed": 42
}"#;

// Stand-in for a circuit simulator run
fn simulate(design: &DesignPoint) -> Result<PerformanceReport, EvaluatorError> {
    std::thread::sleep(Duration::from_millis(20));
    let w = design.get("W").unwrap_or(1e-6);
    let ib = design.get("Ib").unwrap_or(1e-6);
    Ok([("gain", 20.0 + 30.0 * (w / 1e-6).log10()), ("power", 33.0 * ib)]
        .into_iter()
        .collect())
}

fn open(_id: &str, _params: &EvaluatorParams) -> Result<Box<dyn Evaluator>, EvaluatorError> {
    Ok(Box::new(BlockingEvaluator::from_fn(simulate)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let n = 64;
    let env_id = "gace:op2-xh035-v0";

    let mut registry = Registry::new(open).with_pool(PoolConfig { workers: Some(16) });
    registry.register(env_id, EnvConfig::from_json_str(CONFIG)?)?;

    let mut envs = registry.make_batch(env_id, n)?;
    println!("🚀 Created {} instances of {} on {} workers", envs.len(), env_id, envs.workers());
    envs.reset_all().await?;

    let mut rng = StdRng::seed_from_u64(0);
    let actions: Vec<Vec<f32>> = envs.action_spaces().iter().map(|a| a.sample(&mut rng)).collect();

    let tic = Instant::now();
    let batch = envs.step_all(actions).await?;
    let elapsed = tic.elapsed().as_secs_f64();

    println!("✅ Evaluating {} envs took {:.4}s.", n, elapsed);
    println!("ca. {:.3} FPS.", n as f64 / elapsed);

    let solved = batch.infos.iter().filter(|i| i.mask.iter().all(|&m| m)).count();
    let mean = batch.rewards.iter().sum::<f32>() / batch.len() as f32;
    println!("📊 mean reward {:.3}, {} of {} instances meet every target", mean, solved, n);

    envs.close().await?;
    Ok(())
}
