use clap::Parser;
use serde_json::Value;
use tiered_expr::{
    default_compiler_mode, CompilerMode, EvaluationContext, ExpressionParser, ParserConfig,
};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Evaluate an expression against a JSON root.
#[derive(Parser, Debug)]
#[command(name = "texpr", author, version, about)]
struct Args {
    /// Expression text, e.g. `order.lines[0].qty * 2`
    expr: String,
    /// Root JSON document
    #[arg(long, default_value = "null")]
    root: String,
    /// Variable binding as name=JSON (repeatable)
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, Value)>,
    /// Compiler mode: off, immediate or mixed. Defaults to EXPRESSION_COMPILER_MODE.
    #[arg(long)]
    mode: Option<CompilerMode>,
    /// Grow null intermediates into empty objects or lists
    #[arg(long)]
    grow_null: bool,
    /// Grow lists when indexing past their end
    #[arg(long)]
    grow_collections: bool,
    /// Highest index collection growth may reach
    #[arg(long, default_value_t = tiered_expr::config::DEFAULT_MAX_AUTO_GROW_SIZE)]
    max_grow: usize,
    /// Longest expression accepted, in characters
    #[arg(long, default_value_t = tiered_expr::config::DEFAULT_MAX_EXPRESSION_LENGTH)]
    max_length: i64,
    /// Stable runs before a MIXED expression is compiled
    #[arg(long, default_value_t = tiered_expr::config::DEFAULT_PROMOTION_THRESHOLD)]
    threshold: u32,
    /// Evaluate this many times against the same context
    #[arg(long, default_value_t = 1)]
    repeat: usize,
    /// -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_var(s: &str) -> Result<(String, Value), String> {
    let (name, json) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=JSON, got '{s}'"))?;
    let value = serde_json::from_str(json)
        .unwrap_or_else(|_| Value::String(json.to_string()));
    Ok((name.trim().to_string(), value))
}

fn setup_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    let root: Value = match serde_json::from_str(&args.root) {
        Ok(v) => v,
        Err(e) => fail(format!("Invalid root JSON: {e}")),
    };

    let mode = match args.mode {
        Some(m) => m,
        None => default_compiler_mode().unwrap_or_else(|e| fail(e)),
    };
    let config = ParserConfig::full(
        mode,
        None,
        args.grow_null,
        args.grow_collections,
        args.max_grow,
        args.max_length,
    )
    .with_promotion_threshold(args.threshold);

    let expr = ExpressionParser::new(config)
        .parse(&args.expr)
        .unwrap_or_else(|e| fail(e));

    let mut ctx = EvaluationContext::new(root.clone());
    for (name, value) in args.vars {
        ctx.set_variable(name, value);
    }

    let mut out = Value::Null;
    for _ in 0..args.repeat.max(1) {
        out = expr.get_value(&mut ctx).unwrap_or_else(|e| fail(e));
    }
    debug!(state = ?expr.state(), stats = ?expr.stats(), "done");

    let pretty = |v: &Value| serde_json::to_string_pretty(v).unwrap_or_else(|e| fail(e));
    println!("{}", pretty(&out));
    if ctx.root != root {
        println!("root: {}", pretty(&ctx.root));
    }
}
