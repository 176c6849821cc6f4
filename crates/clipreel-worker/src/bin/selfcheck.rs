use std::path::Path;

use clipreel_worker::CompilerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = CompilerConfig::from_env()?;

    println!(
        "clipreel-selfcheck: starting with cache_dir={}",
        config.cache_dir.display()
    );
    ensure_dir(&config.cache_dir).await?;
    ensure_dir(&config.output_dir).await?;
    for program in [&config.ffmpeg_path, &config.ffprobe_path, &config.downloader_path] {
        ensure_executable(program)?;
    }
    ensure_spacer(&config)?;

    println!("clipreel-selfcheck: ok");
    Ok(())
}

async fn ensure_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {}", path.display(), e))?;
    Ok(())
}

fn ensure_executable(program: &str) -> anyhow::Result<()> {
    let resolved = which::which(program).map_err(|e| anyhow::anyhow!("{} not available: {}", program, e))?;
    println!("clipreel-selfcheck: {} -> {}", program, resolved.display());
    Ok(())
}

fn ensure_spacer(config: &CompilerConfig) -> anyhow::Result<()> {
    let found = config
        .transitions_roots
        .iter()
        .map(|root| root.join(&config.static_asset))
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("spacer asset {} not found in any transitions root", config.static_asset))?;
    println!("clipreel-selfcheck: spacer -> {}", found.display());
    Ok(())
}
