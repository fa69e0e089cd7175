use std::env;
use std::error::Error;
use std::fs;
use std::path::Path;

use log::info;
use patchflow::config::load_config;
use patchflow::{
    Compiler, EngineConfig, ExecutionDriver, PatchDefinition, Registries, RuntimeInfo, TimeMode,
};

const USAGE: &str = "usage: cli <patch.json> [--frames N] [--fps F] [--scrub] [--config path]";

struct Args {
    patch_path: String,
    frames: Option<u64>,
    fps: Option<f64>,
    scrub: bool,
    config_path: Option<String>,
}

fn parse_args(args: &[String]) -> Result<Args, Box<dyn Error>> {
    let mut parsed = Args {
        patch_path: String::new(),
        frames: None,
        fps: None,
        scrub: false,
        config_path: None,
    };
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--frames" => {
                let value = iter.next().ok_or("--frames needs a value")?;
                parsed.frames = Some(value.parse()?);
            }
            "--fps" => {
                let value = iter.next().ok_or("--fps needs a value")?;
                parsed.fps = Some(value.parse()?);
            }
            "--scrub" => parsed.scrub = true,
            "--config" => {
                let value = iter.next().ok_or("--config needs a value")?;
                parsed.config_path = Some(value.clone());
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown option '{}'\n{}", other, USAGE).into());
            }
            path => parsed.patch_path = path.to_string(),
        }
    }
    if parsed.patch_path.is_empty() {
        return Err(USAGE.into());
    }
    Ok(parsed)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let args = parse_args(&args)?;

    let mut config = match &args.config_path {
        Some(path) => load_config(Path::new(path)),
        None => EngineConfig::default(),
    };
    if args.scrub {
        config.initial_mode = TimeMode::Scrub;
    }
    let frames = args.frames.unwrap_or(config.frames);
    let fps = args.fps.unwrap_or(config.fps);
    if fps <= 0.0 {
        return Err("--fps must be positive".into());
    }

    let json_str = fs::read_to_string(&args.patch_path)?;
    let patch = PatchDefinition::load(&json_str)?;
    let registries = Registries::with_builtins();
    let result = Compiler::new(&registries).compile(&patch);
    if !result.is_ok() {
        for diagnostic in &result.errors {
            eprintln!("{}", serde_json::to_string(diagnostic)?);
        }
        return Err(format!("{} compile diagnostic(s)", result.errors.len()).into());
    }
    info!("evaluation order: {:?}", result.evaluation_order);

    let mut driver = ExecutionDriver::with_config(result, &registries, &config)?;
    let runtime = RuntimeInfo::default();
    for frame in 0..frames {
        let time_ms = frame as f64 * 1000.0 / fps;
        let tree = driver.run(time_ms, &runtime)?;
        println!("{}", serde_json::to_string(&tree)?);
    }
    Ok(())
}
