use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use node_forge_compositor::{
    Compositor,
    material::load_material_from_path,
    renderer::gpu::{GpuConfig, GpuContext},
    schema::load_default_catalog,
};

#[derive(Debug, Default, Clone)]
struct Cli {
    material: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    size: Option<[u32; 2]>,
    fallback_adapter: bool,
}

fn parse_size(v: &str) -> Result<[u32; 2]> {
    let (w, h) = v
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("invalid --size '{v}' (expected WxH, e.g. 1024x1024)"))?;
    let w: u32 = w.trim().parse().map_err(|e| anyhow!("invalid width in --size '{v}': {e}"))?;
    let h: u32 = h.trim().parse().map_err(|e| anyhow!("invalid height in --size '{v}': {e}"))?;
    if w == 0 || h == 0 {
        return Err(anyhow!("--size must be non-zero, got '{v}'"));
    }
    Ok([w, h])
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--material" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --material"));
                };
                cli.material = Some(PathBuf::from(v));
                i += 2;
            }
            "--outputdir" | "--output-dir" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --output-dir"));
                };
                cli.output_dir = Some(PathBuf::from(v));
                i += 2;
            }
            "--size" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --size"));
                };
                cli.size = Some(parse_size(v)?);
                i += 2;
            }
            "--fallback-adapter" => {
                cli.fallback_adapter = true;
                i += 1;
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other} (supported: --material <material.json>, --output-dir <dir>, --size <WxH>, --fallback-adapter)"
                ));
            }
        }
    }
    Ok(cli)
}

fn save_png(image: &image::RgbaImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("[export] saved: {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    let material_path = cli
        .material
        .ok_or_else(|| anyhow!("--material <material.json> is required"))?;
    let output_dir = cli.output_dir.unwrap_or_else(|| {
        material_path
            .parent()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let material = load_material_from_path(&material_path)?;
    let size = cli.size.unwrap_or(material.output_size());
    let catalog = load_default_catalog()?;

    let gpu = GpuContext::headless(GpuConfig {
        force_fallback_adapter: cli.fallback_adapter,
        ..GpuConfig::default()
    })?;
    let mut compositor = Compositor::new(Arc::new(gpu), Arc::new(catalog));

    let export = compositor.export_outputs(&material, size)?;
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    for (node_id, outputs) in &export.outputs {
        for (socket, bitmap) in outputs {
            save_png(bitmap, &output_dir.join(format!("node-{node_id}-{socket}.png")))?;
        }
    }
    match &export.preview {
        Some(preview) => save_png(preview, &output_dir.join("preview.png"))?,
        None => log::warn!("no preview was rendered"),
    }
    Ok(())
}
