#![recursion_limit = "256"]

use attn_resnet::layers::activation::ActivationConfig;
use attn_resnet::models::resnet::{ResNet, ResNetMeta, lookup_prefab, prefab_names};
use burn::backend::NdArray;
use burn::config::Config;
use burn::prelude::{Module, Tensor};
use burn::tensor::Distribution;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// $ --prefab=aa_resnet50 --num-classes=10 --resolution=64
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Name of the model prefab.
    #[arg(long, default_value = "resnet18")]
    prefab: String,

    /// Number of classification classes.
    #[arg(long, default_value_t = 1000)]
    num_classes: usize,

    /// Batch size of the probe input.
    #[arg(short, long, default_value_t = 1)]
    batch_size: usize,

    /// Square input resolution; must be a multiple of 32.
    #[arg(long, default_value_t = 224)]
    resolution: usize,

    /// Activation name; "none" disables activations.
    #[arg(long, default_value = "relu")]
    activation: String,

    /// Write the lowered structure config to this path.
    #[arg(long)]
    save_config: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    type B = NdArray;
    let device = Default::default();

    let prefab = lookup_prefab(&args.prefab)
        .map_err(|err| anyhow::anyhow!("{err}; known prefabs: {:?}", prefab_names()))?;
    tracing::info!(name = %prefab.name, description = %prefab.description, "prefab");

    let config = prefab
        .config(args.num_classes)
        .with_input_resolution([args.resolution, args.resolution])
        .with_activation(ActivationConfig::from_name(&args.activation)?);
    let structure = config.try_to_structure()?;

    if let Some(path) = &args.save_config {
        structure.save(path)?;
        tracing::info!(path = %path, "saved structure config");
    }

    let model: ResNet<B> = structure.init(&device);
    tracing::info!(
        num_params = model.num_params(),
        stacks = model.stacks.len(),
        feature_planes = model.feature_planes(),
        "model"
    );

    let input = Tensor::<B, 4>::random(
        [args.batch_size, model.in_channels(), args.resolution, args.resolution],
        Distribution::Default,
        &device,
    );

    let features = model.forward_features(input.clone());
    tracing::info!(shape = ?features.dims(), "features");

    let probs = model.forward(input);
    let top = probs.clone().argmax(1).into_data();
    tracing::info!(shape = ?probs.dims(), top = ?top.to_vec::<i64>().unwrap_or_default(), "probabilities");

    Ok(())
}
