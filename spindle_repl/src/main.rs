use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use codesnake::{Block, CodeWidth, Label, LineIndex};
use spindle::{limits::MAX_DEPTH, Options, Pool, Schema, SchemaError};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};
use yansi::Paint;

/// Compile schema types into encoder programs and print their disassembly
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Schema file to load
    schema: PathBuf,
    /// Print the program of this type and exit
    #[arg(long)]
    root: Option<String>,
    /// Nesting budget of the execution engine
    #[arg(long, default_value_t = MAX_DEPTH)]
    max_depth: usize,
    /// Skip the peephole pass
    #[arg(long)]
    no_optimize: bool,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn report(file: &str, src: &str, err: &SchemaError) {
    let idx = LineIndex::new(src);
    let mut span = err.span();
    // end of input has no width, point at the last character instead
    if span.is_empty() {
        span.start = span.start.saturating_sub(1);
    }

    let label = Label::new(span)
        .with_text(err.to_string().red().to_string())
        .with_style(|s| s.red().to_string());
    match Block::new(&idx, [label]) {
        Some(block) => {
            let block = block.map_code(|c| CodeWidth::new(c, c.len()));
            eprintln!("{}[{file}]", block.prologue());
            eprint!("{block}");
            eprintln!("{}", block.epilogue());
        }
        None => eprintln!("{} {err}", "error:".red().bold()),
    }
}

/// Colours opcode names and labels of a disassembly listing.
fn paint_listing(text: &str) -> String {
    text.lines()
        .map(|line| match line.strip_prefix('\t') {
            Some(ins) => {
                let (op, arg) = ins.split_at(ins.len().min(18));
                let arg = if arg.starts_with("L_") {
                    arg.yellow().to_string()
                } else {
                    arg.green().to_string()
                };
                format!("\t{}{arg}", op.cyan())
            }
            None => line.yellow().bold().to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn list_types(schema: &Schema) {
    for name in schema.names() {
        let Some(ty) = schema.lookup(name) else {
            continue;
        };
        let shape = schema.types().display(ty).to_string();
        if shape == name {
            println!("{}", name.cyan());
        } else {
            println!("{} = {shape}", name.cyan());
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let file = args.schema.display().to_string();
    let source =
        std::fs::read_to_string(&args.schema).with_context(|| format!("reading {file}"))?;
    let mut schema = match Schema::parse(&source) {
        Ok(schema) => schema,
        Err(err) => {
            report(&file, &source, &err);
            anyhow::bail!("could not load {file}");
        }
    };
    debug!(names = schema.names().len(), types = schema.types().len(), "loaded schema");

    let options = Options::default()
        .with_max_depth(args.max_depth)
        .with_optimize(!args.no_optimize);
    let mut pool = Pool::new();
    let mut compiler = pool.acquire_compiler(options);

    if let Some(root) = &args.root {
        let ty = schema
            .lookup(root)
            .with_context(|| format!("no type named `{root}` in {file}"))?;
        let program = compiler.compile(schema.types(), ty)?;
        println!("{}", program.disassemble(schema.types()));
        return Ok(());
    }

    let mut readline = rustyline::DefaultEditor::new()?;
    while let Ok(input) = readline.readline(">> ") {
        let line = input.trim();
        match line {
            "" => continue,
            ":quit" | ":q" => break,
            ":types" => {
                list_types(&schema);
                continue;
            }
            _ => {}
        }
        _ = readline.add_history_entry(line);

        let ty = match schema.parse_type(line) {
            Ok(ty) => ty,
            Err(err) => {
                report("<input>", line, &err);
                continue;
            }
        };
        match compiler.compile_pooled(schema.types(), ty, &mut pool) {
            Ok(program) => {
                println!("{}", paint_listing(&program.disassemble(schema.types())));
                program.release(&mut pool);
            }
            Err(err) => eprintln!("{} {err}", "error:".red().bold()),
        }
    }

    compiler.release(&mut pool);
    Ok(())
}
