use std::{fs::File, path::PathBuf, time::Instant};

use anyhow::Result;
use clap::Parser;
use itertools::Itertools;
use memmap2::Mmap;
use rwkv_mix::{
    sampler::softmax, Block, Loader, Matrix, MixConfig, SamplerConfig, Shape, TensorCpu,
    TruncationSampler,
};
use safetensors::SafeTensors;

fn default_config() -> MixConfig {
    MixConfig {
        num_emb: 64,
        num_head: 4,
        num_hidden: 256,
        ctx_len: 128,
        time_shift: Default::default(),
        channel_shift: Default::default(),
    }
}

fn load_blocks(path: PathBuf) -> Result<Vec<Block>> {
    let file = File::open(path)?;
    let map = unsafe { Mmap::map(&file)? };
    let model = SafeTensors::deserialize(&map)?;
    let blocks = Loader::new(&model).load_blocks()?;
    log::info!("loaded {} blocks", blocks.len());
    Ok(blocks)
}

fn run(cli: Cli) -> Result<()> {
    let mut rng = fastrand::Rng::with_seed(cli.seed);

    let blocks = match cli.model {
        Some(path) => load_blocks(path)?,
        None => {
            let config = match cli.config {
                Some(path) => MixConfig::from_file(path)?,
                None => default_config(),
            };
            log::info!("{:#?}", config);
            (0..cli.layer)
                .map(|_| Block::random(&mut rng, &config))
                .collect::<Result<_, _>>()?
        }
    };
    let Some(first) = blocks.first() else {
        anyhow::bail!("no blocks to run");
    };
    let num_emb = *first.att().num_emb();

    let sampler = TruncationSampler::new(SamplerConfig {
        temperature: cli.temperature,
        ..Default::default()
    })?;
    let head = Matrix::random(&mut rng, num_emb, cli.vocab, (num_emb as f32).sqrt().recip());

    let shape = Shape::new(num_emb, cli.token, cli.batch, 1);
    let data = (0..shape.len()).map(|_| rng.f32() - 0.5).collect();
    let mut x = TensorCpu::from_data(shape, data)?;

    let start = Instant::now();
    for block in &blocks {
        x = block.forward(&x)?;
    }
    log::info!(
        "{} blocks over {shape}: {} mills",
        blocks.len(),
        start.elapsed().as_millis()
    );

    let last = x.slice((.., cli.token - 1, ..))?;
    let logits = head.matmul(&last)?;
    for batch in 0..cli.batch {
        let probs = softmax(logits.vector(0, batch));
        let candidates = sampler.truncate(&probs)?;
        let token = candidates.draw(rng.f32());
        println!(
            "batch {batch}: {} of {} candidates, sampled {token} (p = {:.4})",
            candidates.len(),
            cli.vocab,
            probs[token]
        );
        let top = candidates
            .indices()
            .iter()
            .zip(candidates.probs())
            .sorted_unstable_by(|&(_, x), &(_, y)| x.total_cmp(y).reverse())
            .take(5)
            .map(|(index, p)| format!("{index}:{p:.3}"))
            .join(" ");
        println!("    top: {top}");
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Safetensors file holding RWKV v1 blocks.
    #[arg(short, long, value_name = "FILE")]
    model: Option<PathBuf>,
    /// JSON layer config, used when no model is given.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    #[arg(short, long, default_value_t = 2)]
    layer: usize,
    #[arg(short, long, default_value_t = 16)]
    token: usize,
    #[arg(short, long, default_value_t = 1)]
    batch: usize,
    #[arg(short, long, default_value_t = 512)]
    vocab: usize,
    #[arg(long, default_value_t = 1.0)]
    temperature: f32,
    #[arg(short, long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .with_module_level("rwkv_mix", log::LevelFilter::Info)
        .with_module_level("mix", log::LevelFilter::Info)
        .init()?;

    let cli = Cli::parse();
    anyhow::ensure!(cli.token > 0 && cli.batch > 0 && cli.vocab > 0);
    run(cli)
}
