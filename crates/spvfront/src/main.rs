use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use spvfront::{translate_bytes, Capabilities, ShaderStage, SpecOverride, TranslateOptions};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// spvfront — translate a SPIR-V module into structured SSA IR.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input SPIR-V binary (.spv)
    input: PathBuf,

    /// Entry point name
    #[arg(long, short, default_value = "main")]
    entry: String,

    /// Stage of the entry point
    #[arg(long, short, value_enum, default_value_t = Stage::Fragment)]
    stage: Stage,

    /// Specialization constant override, `ID=VALUE` (integer, hex or float)
    #[arg(long = "spec", value_parser = parse_spec)]
    specs: Vec<SpecOverride>,

    /// Address UBOs and SSBOs as block index + byte offset
    #[arg(long)]
    lower_buffers_to_offsets: bool,

    /// Address workgroup variables as byte offsets
    #[arg(long)]
    lower_shared_to_offsets: bool,

    /// Output file for the IR dump
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl From<Stage> for ShaderStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Vertex => ShaderStage::Vertex,
            Stage::TessControl => ShaderStage::TessControl,
            Stage::TessEval => ShaderStage::TessEval,
            Stage::Geometry => ShaderStage::Geometry,
            Stage::Fragment => ShaderStage::Fragment,
            Stage::Compute => ShaderStage::Compute,
        }
    }
}

fn parse_spec(arg: &str) -> Result<SpecOverride> {
    let (id, value) = arg.split_once('=').context("expected ID=VALUE")?;
    let id = id.trim().parse().with_context(|| format!("invalid spec constant id `{id}`"))?;
    let value = value.trim();
    let bits = if let Some(hex) = value.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).with_context(|| format!("invalid hex value `{value}`"))?
    } else if value.contains(['.', 'e', 'E']) {
        let f: f32 = value.parse().with_context(|| format!("invalid float value `{value}`"))?;
        u64::from(f.to_bits())
    } else if let Ok(v) = value.parse::<u64>() {
        v
    } else if let Ok(v) = value.parse::<i64>() {
        v as u64
    } else {
        bail!("invalid value `{value}`");
    };
    Ok(SpecOverride { id, value: bits })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!(input = %cli.input.display(), entry = %cli.entry, "translating");

    let bytes = fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;

    let options = TranslateOptions {
        lower_ubo_ssbo_access_to_offsets: cli.lower_buffers_to_offsets,
        lower_workgroup_access_to_offsets: cli.lower_shared_to_offsets,
        supported_capabilities: Capabilities::all(),
        shader_viewport_index_layer_supported: true,
    };

    let shader = translate_bytes(&bytes, cli.stage.into(), &cli.entry, &cli.specs, &options)
        .context("translation failed")?;
    let dump = shader.to_string();

    if let Some(output_path) = cli.output {
        fs::write(&output_path, &dump).with_context(|| format!("failed to write {}", output_path.display()))?;
        info!(output = %output_path.display(), "wrote IR");
    } else {
        print!("{dump}");
    }
    Ok(())
}
