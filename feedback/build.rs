use common::yaml_include::load_yaml_with_includes;
use std::{error::Error, fs, io::Write, path::Path};

fn main() -> Result<(), Box<dyn Error>> {
    let project_name = "feedback";
    println!("cargo:rerun-if-changed=config");
    println!("cargo:rerun-if-env-changed=FEEDBACK_ENV");

    let out_dir = std::env::var("OUT_DIR")?;
    let env = std::env::var("FEEDBACK_ENV").unwrap_or_else(|_| "dev".to_string());
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());

    // OUT_DIR lives under target/<profile>/build/...
    let target_dir = Path::new(&out_dir)
        .ancestors()
        .find(|p| p.ends_with("target"))
        .ok_or("could not locate the target directory from OUT_DIR")?
        .join(&profile);

    let source = Path::new(&std::env::var("CARGO_MANIFEST_DIR")?)
        .join("config")
        .join(format!("{}.yaml", env));
    println!("cargo:warning=Composing {} config for env {:?} profile {:?}", project_name, env, profile);
    let config_yaml = load_yaml_with_includes(&source)?;

    let mut out_str = String::new();
    {
        let mut emitter = yaml_rust2::YamlEmitter::new(&mut out_str);
        emitter.dump(&config_yaml)?;
    }

    let total_config_dir = target_dir.join("config");
    fs::create_dir_all(&total_config_dir)?;
    fs::File::create(total_config_dir.join("total_config.yaml"))?.write_all(out_str.as_bytes())?;

    Ok(())
}
