// Digits — synthetic glyph classification with a small convolutional stack
//
// Generates noisy 8×8 single-channel glyphs in four classes (horizontal bar,
// vertical bar, diagonal, box), then trains:
//
//   conv(4 kernels, 3×3, stride 1) → max-pool(2×2) → dense(16) → dense(4)
//
// Usage:
//   cargo run -p digits-demo                  # defaults
//   cargo run -p digits-demo -- --epochs 20   # train longer
//   cargo run -p digits-demo -- --seed 7      # reproducible run

use stoat::prelude::*;

struct Config {
    epochs: usize,
    batch_size: usize,
    learning_rate: f32,
    samples: usize,
    seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 16,
            learning_rate: 0.3,
            samples: 512,
            seed: 42,
        }
    }
}

fn parse_args() -> Config {
    let mut cfg = Config::default();
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--epochs" => {
                i += 1;
                cfg.epochs = args[i].parse().expect("invalid --epochs");
            }
            "--batch-size" => {
                i += 1;
                cfg.batch_size = args[i].parse().expect("invalid --batch-size");
            }
            "--lr" => {
                i += 1;
                cfg.learning_rate = args[i].parse().expect("invalid --lr");
            }
            "--samples" => {
                i += 1;
                cfg.samples = args[i].parse().expect("invalid --samples");
            }
            "--seed" => {
                i += 1;
                cfg.seed = args[i].parse().expect("invalid --seed");
            }
            "--help" | "-h" => {
                println!("Synthetic glyph classification demo for Stoat");
                println!();
                println!("Options:");
                println!("  --epochs <n>        Training epochs (default: 10)");
                println!("  --batch-size <n>    Batch size (default: 16)");
                println!("  --lr <f>            Learning rate (default: 0.3)");
                println!("  --samples <n>       Training samples (default: 512)");
                println!("  --seed <n>          RNG seed (default: 42)");
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(1);
            }
        }
        i += 1;
    }
    cfg
}

const SIDE: usize = 8;
const CLASSES: usize = 4;

/// One noisy glyph of the given class, plus its one-hot label.
fn make_glyph(class: usize, rng: &mut RngContext) -> Result<(Tensor, Tensor)> {
    let mut pixels = vec![0.0f32; SIDE * SIDE];
    match class {
        // horizontal bar
        0 => {
            let row = 2 + rng.index(SIDE - 4);
            for x in 0..SIDE {
                pixels[x + row * SIDE] = 1.0;
            }
        }
        // vertical bar
        1 => {
            let col = 2 + rng.index(SIDE - 4);
            for y in 0..SIDE {
                pixels[col + y * SIDE] = 1.0;
            }
        }
        // diagonal
        2 => {
            for i in 0..SIDE {
                pixels[i + i * SIDE] = 1.0;
            }
        }
        // box outline
        _ => {
            for i in 1..SIDE - 1 {
                pixels[i + SIDE] = 1.0;
                pixels[i + (SIDE - 2) * SIDE] = 1.0;
                pixels[1 + i * SIDE] = 1.0;
                pixels[(SIDE - 2) + i * SIDE] = 1.0;
            }
        }
    }
    for p in pixels.iter_mut() {
        *p += rng.uniform(-0.1, 0.1);
    }

    let data = Tensor::from_slice((SIDE, SIDE, 1), &pixels)?;
    let mut label = Tensor::zeros(Format::column(CLASSES))?;
    label.set_flat(class, 1.0)?;
    Ok((data, label))
}

fn make_set(count: usize, rng: &mut RngContext) -> Result<DataSpace> {
    let mut data = Vec::with_capacity(count);
    let mut labels = Vec::with_capacity(count);
    for i in 0..count {
        let (d, l) = make_glyph(i % CLASSES, rng)?;
        data.push(d);
        labels.push(l);
    }
    DataSpace::new((SIDE, SIDE, 1), Format::column(CLASSES), &data, &labels)
}

fn main() -> Result<()> {
    let cfg = parse_args();
    let mut rng = RngContext::from_seed(cfg.seed);

    let mut train_set = make_set(cfg.samples, &mut rng)?;
    let test_set = make_set(cfg.samples / 4, &mut rng)?;

    let mut net = Network::new();
    net.set_input_format((SIDE, SIDE, 1))?;
    net.set_output_format(Format::column(CLASSES))?;
    net.add_convolutional(4, 3, 1, Activation::Relu)?;
    net.add_pooling(2, 2, PoolKind::Max)?;
    net.add_fully_connected(16, Activation::Sigmoid)?;
    net.add_output_fully_connected(Activation::Sigmoid)?;
    net.apply_noise(0.5, &mut rng)?;

    println!(
        "training on {} glyphs ({} epochs, batch {}, lr {})",
        cfg.samples, cfg.epochs, cfg.batch_size, cfg.learning_rate
    );

    let per_epoch = TrainConfig {
        batch_size: cfg.batch_size,
        epochs: 1,
        learning_rate: cfg.learning_rate,
    };
    for epoch in 0..cfg.epochs {
        net.learn(&mut train_set, &per_epoch, &mut rng)?;
        let result = net.test(&test_set, same_classification)?;
        println!(
            "epoch {:>3}: accuracy {:>6.2}%  avg cost {:.4}",
            epoch,
            result.accuracy * 100.0,
            result.avg_cost
        );
    }

    println!();
    println!("{}", net.test(&test_set, same_classification)?);
    Ok(())
}
