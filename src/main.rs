//! Tessella CLI - Demand-driven Image Pipelines
//!
//! Runs one operation on a file and writes the result.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::time::Instant;
use tessella::core::config::{self, EngineConfig};
use tessella::create::{self, Align, TextOptions};
use tessella::prelude::*;

/// Flags that take no value.
const SWITCHES: &[&str] = &["pad", "novector", "rgba"];

struct Args {
    positional: Vec<String>,
    options: HashMap<String, String>,
}

impl Args {
    fn parse(raw: &[String]) -> Result<Self> {
        let mut positional = Vec::new();
        let mut options = HashMap::new();

        let mut i = 0;
        while i < raw.len() {
            match raw[i].strip_prefix("--") {
                Some(name) if SWITCHES.contains(&name) => {
                    options.insert(name.to_string(), String::new());
                    i += 1;
                }
                Some(name) => {
                    let value = raw.get(i + 1).with_context(|| format!("--{} needs a value", name))?;
                    options.insert(name.to_string(), value.clone());
                    i += 2;
                }
                None => {
                    positional.push(raw[i].clone());
                    i += 1;
                }
            }
        }

        Ok(Self { positional, options })
    }

    fn arg(&self, index: usize, what: &str) -> Result<&str> {
        self.positional
            .get(index)
            .map(String::as_str)
            .with_context(|| format!("missing argument <{}>", what))
    }

    fn number<T: std::str::FromStr>(&self, index: usize, what: &str) -> Result<T> {
        let text = self.arg(index, what)?;
        text.parse().ok().with_context(|| format!("<{}> must be a number, not '{}'", what, text))
    }

    fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    fn option_number<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.option(name)
            .map(|text| text.parse().ok().with_context(|| format!("--{} must be a number, not '{}'", name, text)))
            .transpose()
    }

    fn switch(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("tessella");

    if args.len() < 2 {
        print_usage(program);
        return;
    }

    if let Err(e) = run(&args[1], &args[2..]) {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: &str, raw: &[String]) -> Result<()> {
    let args = Args::parse(raw)?;
    configure(&args)?;

    match command {
        "embed" => embed_command(&args),
        "gravity" => gravity_command(&args),
        "reduce" => reduce_command(&args),
        "morph" => morph_command(&args),
        "text" => text_command(&args),
        "header" => header_command(&args),
        "help" | "--help" | "-h" => {
            print_usage("tessella");
            Ok(())
        }
        other => bail!("unknown command '{}'", other),
    }
}

fn print_usage(program: &str) {
    println!("Tessella v{}", tessella::VERSION);
    println!();
    println!("Usage: {} <command> [arguments] [options]", program);
    println!();
    println!("Commands:");
    println!("  embed <in> <out> <x> <y> <width> <height>     Place an image on a canvas");
    println!("  gravity <in> <out> <direction> <width> <height>  Place at a compass position");
    println!("  reduce <in> <out> <hshrink> <vshrink>          Shrink with a windowed kernel");
    println!("  morph <in> <out> <mask> <erode|dilate>         Binary morphology");
    println!("  text <out> <markup>                            Render text");
    println!("  header <in>                                    Print image properties");
    println!("  help                                           Show this help message");
    println!();
    println!("Embed and gravity options:");
    println!("  --extend <mode>       black, white, copy, repeat, mirror or background");
    println!("  --background <v,..>   Background colour, one value or one per band");
    println!();
    println!("Reduce options:");
    println!("  --kernel <kernel>     nearest, linear, cubic, mitchell, lanczos2, lanczos3,");
    println!("                        mks2013 or mks2021 (default: lanczos3)");
    println!("  --gap <gap>           Shrink by box filter first, keeping this much reduce");
    println!();
    println!("Morph options:");
    println!("  --pad                 Keep the input size by copying edges");
    println!("  --novector            Always use the scalar path");
    println!();
    println!("Text options:");
    println!("  --font <desc>  --width <px>  --height <px>  --dpi <n>  --spacing <px>");
    println!("  --align <low|centre|high>  --fontfile <path>  --rgba");
    println!();
    println!("Global options:");
    println!("  --config <file>       Engine configuration in TOML");
    println!("  --concurrency <n>     Worker lanes (0 = one per core)");
    println!();
    println!("Set RUST_LOG=info to see the strategies operations choose.");
}

fn configure(args: &Args) -> Result<()> {
    let mut engine = match args.option("config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    }
    .with_env_overrides()?;

    if let Some(concurrency) = args.option_number("concurrency")? {
        engine = engine.with_concurrency(concurrency);
    }
    engine.validate()?;
    config::init(&engine);
    Ok(())
}

/// Evaluate `image` with a progress line and write it to `path`.
fn write(image: &Image, path: &str) -> Result<()> {
    let start = Instant::now();
    let options = ExecutionOptions::new().with_progress(|update| {
        if let ProgressUpdate::Completed { total_duration_ms, tiles_processed } = update {
            println!("✅ Computed {} tiles in {}ms", tiles_processed, total_duration_ms);
        }
    });
    let result = ExecutionEngine::new().execute(image, Some(options))?;
    create::save(&result.image, path).with_context(|| format!("unable to write {}", path))?;
    println!(
        "🎉 Wrote {}x{} {} to {} ({}ms)",
        image.width(),
        image.height(),
        image.format().name(),
        path,
        start.elapsed().as_millis()
    );
    Ok(())
}

fn load(path: &str) -> Result<Image> {
    create::load(path).with_context(|| format!("unable to read {}", path))
}

fn embed_options(args: &Args) -> Result<EmbedOptions> {
    let mut options = EmbedOptions::new();
    if let Some(extend) = args.option("extend") {
        options = options.with_extend(extend.parse()?);
    }
    if let Some(background) = args.option("background") {
        let values = background
            .split(',')
            .map(|v| v.trim().parse::<f64>().with_context(|| format!("bad background value '{}'", v)))
            .collect::<Result<Vec<_>>>()?;
        options = options.with_background(values);
    }
    Ok(options)
}

fn embed_command(args: &Args) -> Result<()> {
    let input = load(args.arg(0, "in")?)?;
    let output = embed(
        &input,
        args.number(2, "x")?,
        args.number(3, "y")?,
        args.number(4, "width")?,
        args.number(5, "height")?,
        &embed_options(args)?,
    )?;
    write(&output, args.arg(1, "out")?)
}

fn gravity_command(args: &Args) -> Result<()> {
    let input = load(args.arg(0, "in")?)?;
    let direction: CompassDirection = args.arg(2, "direction")?.parse()?;
    let output = gravity(
        &input,
        direction,
        args.number(3, "width")?,
        args.number(4, "height")?,
        &embed_options(args)?,
    )?;
    write(&output, args.arg(1, "out")?)
}

fn reduce_command(args: &Args) -> Result<()> {
    let input = load(args.arg(0, "in")?)?;
    let mut options = ReduceOptions::default();
    if let Some(kernel) = args.option("kernel") {
        options = options.with_kernel(kernel.parse()?);
    }
    if let Some(gap) = args.option_number("gap")? {
        options = options.with_gap(gap);
    }
    let output = reduce(&input, args.number(2, "hshrink")?, args.number(3, "vshrink")?, &options)?;
    write(&output, args.arg(1, "out")?)
}

fn morph_command(args: &Args) -> Result<()> {
    let input = load(args.arg(0, "in")?)?;
    let mask_path = args.arg(2, "mask")?;
    let mask: MorphMask = std::fs::read_to_string(mask_path)
        .with_context(|| format!("unable to read mask {}", mask_path))?
        .parse()?;
    let op: MorphOp = args.arg(3, "erode|dilate")?.parse()?;

    let mut options = MorphOptions::default().with_pad(args.switch("pad"));
    if args.switch("novector") {
        options = options.with_vector(false);
    }
    let output = morph(&input, &mask, op, &options)?;
    write(&output, args.arg(1, "out")?)
}

fn text_command(args: &Args) -> Result<()> {
    let mut options = TextOptions::new().with_rgba(args.switch("rgba"));
    if let Some(font) = args.option("font") {
        options = options.with_font(font);
    }
    if let Some(width) = args.option_number("width")? {
        options = options.with_width(width);
    }
    if let Some(height) = args.option_number("height")? {
        options = options.with_height(height);
    }
    if let Some(dpi) = args.option_number("dpi")? {
        options = options.with_dpi(dpi);
    }
    if let Some(spacing) = args.option_number("spacing")? {
        options = options.with_spacing(spacing);
    }
    if let Some(fontfile) = args.option("fontfile") {
        options = options.with_fontfile(fontfile);
    }
    if let Some(align) = args.option("align") {
        options = options.with_align(match align {
            "low" | "left" => Align::Low,
            "centre" | "center" => Align::Centre,
            "high" | "right" => Align::High,
            other => bail!("unknown alignment '{}'", other),
        });
    }

    let rendered = text(args.arg(1, "markup")?, &options)?;
    println!("🔤 Rendered at {} dpi", rendered.dpi);
    write(&rendered.image, args.arg(0, "out")?)
}

fn header_command(args: &Args) -> Result<()> {
    let path = args.arg(0, "in")?;
    let image = load(path)?;
    let desc = image.desc();
    println!("{}: {}x{} {}, {} bands, {:?}", path, desc.width, desc.height, desc.format.name(), desc.bands, desc.interpretation);
    println!("  offset: {}, {}", desc.xoffset, desc.yoffset);
    println!("  coding: {:?}", desc.coding);
    Ok(())
}
