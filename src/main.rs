//! Inferir CLI - quantized LLM inference from GGUF checkpoints
//!
//! # Commands
//!
//! - `run` - Generate a response for one prompt (REPL if the prompt is omitted)
//! - `chat` - Interactive chat with conversation history
//! - `info` - Inspect a checkpoint or show version info

use std::io::{BufRead, Write};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use inferir::generate::{generate, GenerationOptions, GenerationOutput, StopReason};
use inferir::gguf::{GGUFValue, MappedGGUFModel};
use inferir::sampler::TokenSampler;
use inferir::transformer::{InferenceState, QuantizedTransformer};
use inferir::vocab::{ByteFallbackFormat, ChatFormat, Vocabulary};
use inferir::{InferirError, Result};

/// Inferir - quantized LLM inference engine
///
/// Memory-maps a GGUF checkpoint and decodes on the CPU.
#[derive(Parser)]
#[command(name = "inferir")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a response for a single prompt
    ///
    /// Examples:
    ///   inferir run ./model.gguf "What is Rust?"
    ///   inferir run ./model.gguf --temperature 0.8 --seed 7 "Tell a story"
    Run {
        /// Path to a GGUF checkpoint
        #[arg(value_name = "MODEL")]
        model: String,

        /// Prompt text (interactive mode if omitted)
        #[arg(value_name = "PROMPT")]
        prompt: Option<String>,

        /// System prompt prepended to the conversation
        #[arg(short = 's', long)]
        system_prompt: Option<String>,

        /// Maximum tokens to generate
        #[arg(short = 'n', long, default_value = "512")]
        max_tokens: usize,

        /// Sampling temperature (0.0 = deterministic)
        #[arg(short, long, default_value = "0.1")]
        temperature: f32,

        /// Nucleus sampling threshold
        #[arg(long, default_value = "0.95")]
        top_p: f32,

        /// Random seed (defaults to system time)
        #[arg(long)]
        seed: Option<u64>,

        /// Print the full response at the end instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Also print the prompt tokens as they are prefilled
        #[arg(long)]
        echo: bool,
    },
    /// Interactive chat with conversation history
    ///
    /// Examples:
    ///   inferir chat ./model.gguf
    ///   inferir chat ./model.gguf --system-prompt "You are terse."
    Chat {
        /// Path to a GGUF checkpoint
        #[arg(value_name = "MODEL")]
        model: String,

        /// System prompt for the first turn
        #[arg(short = 's', long)]
        system_prompt: Option<String>,

        /// Maximum tokens per response
        #[arg(short = 'n', long, default_value = "512")]
        max_tokens: usize,

        /// Sampling temperature (0.0 = deterministic)
        #[arg(short, long, default_value = "0.1")]
        temperature: f32,

        /// Nucleus sampling threshold
        #[arg(long, default_value = "0.95")]
        top_p: f32,

        /// Random seed (defaults to system time)
        #[arg(long)]
        seed: Option<u64>,

        /// Print each response at the end instead of streaming
        #[arg(long)]
        no_stream: bool,
    },
    /// Inspect a checkpoint, or show version info with no argument
    Info {
        /// Path to a GGUF checkpoint
        #[arg(value_name = "MODEL")]
        model: Option<String>,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            model,
            prompt,
            system_prompt,
            max_tokens,
            temperature,
            top_p,
            seed,
            no_stream,
            echo,
        } => {
            let options = GenerationOptions::default()
                .with_temperature(temperature)
                .with_top_p(top_p)
                .with_seed(seed.unwrap_or_else(default_seed))
                .with_max_tokens(max_tokens)
                .with_stream(!no_stream)
                .with_echo(echo);
            options.validate()?;
            match prompt {
                Some(text) => run_once(&model, system_prompt.as_deref(), &text, &options),
                None => run_interactive(&model, system_prompt.as_deref(), &options),
            }
        },
        Commands::Chat {
            model,
            system_prompt,
            max_tokens,
            temperature,
            top_p,
            seed,
            no_stream,
        } => {
            let options = GenerationOptions::default()
                .with_temperature(temperature)
                .with_top_p(top_p)
                .with_seed(seed.unwrap_or_else(default_seed))
                .with_max_tokens(max_tokens)
                .with_stream(!no_stream);
            options.validate()?;
            run_interactive(&model, system_prompt.as_deref(), &options)
        },
        Commands::Info { model } => match model {
            Some(path) => show_checkpoint_info(&path),
            None => {
                show_version_info();
                Ok(())
            },
        },
    }
}

/// Seconds since the epoch, falling back to a fixed seed if the clock is
/// unreadable
fn default_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(42, |d| d.as_secs())
}

// ============================================================================
// Model loading
// ============================================================================

fn load_model(path: &str) -> Result<MappedGGUFModel> {
    println!("Loading model: {path}");
    let start = Instant::now();

    let mapped = MappedGGUFModel::open(path)?;
    mapped.advise_willneed();

    let gguf = &mapped.model;
    println!("  Format: GGUF v{}", gguf.header.version);
    println!("  Tensors: {}", gguf.header.tensor_count);
    println!("  Size: {}", format_size(mapped.file_size() as u64));
    if let Some(vocab) = Vocabulary::from_metadata(gguf)? {
        println!("  Vocabulary: {} tokens", vocab.len());
    }
    println!("  Loaded in {:.2}s", start.elapsed().as_secs_f64());

    Ok(mapped)
}

fn check_chat_vocab(model: &QuantizedTransformer<'_>) -> Result<()> {
    if model.config.vocab_size < ByteFallbackFormat::VOCAB_SIZE {
        return Err(InferirError::InvalidConfiguration(format!(
            "model vocabulary of {} entries is too small for the byte-level chat format ({} required)",
            model.config.vocab_size,
            ByteFallbackFormat::VOCAB_SIZE
        )));
    }
    Ok(())
}

fn print_config(model: &QuantizedTransformer<'_>) {
    let config = &model.config;
    println!(
        "  Architecture: {} ({} layers, {} heads, {} kv-heads)",
        config.architecture, config.num_layers, config.num_heads, config.num_kv_heads
    );
    println!(
        "  Dims: embedding {}, ffn {}, context {}",
        config.embedding_dim, config.ffn_dim, config.context_length
    );
}

// ============================================================================
// Single-prompt mode
// ============================================================================

fn run_once(model_path: &str, system_prompt: Option<&str>, prompt: &str, options: &GenerationOptions) -> Result<()> {
    let mapped = load_model(model_path)?;
    let model = QuantizedTransformer::from_mapped(&mapped)?;
    check_chat_vocab(&model)?;
    print_config(&model);
    println!();

    let format = ByteFallbackFormat;
    let mut prompt_tokens = vec![format.begin_of_text()];
    if let Some(system) = system_prompt {
        prompt_tokens.extend(format.encode_message("system", system));
    }
    prompt_tokens.extend(format.encode_message("user", prompt));
    prompt_tokens.extend(format.encode_header("assistant"));

    let stop_tokens: Vec<u32> = format.stop_tokens().into_iter().collect();
    let mut state = InferenceState::new(&model.config);
    let mut sampler = options.build_sampler();

    let output = run_turn(&model, &mut state, &mut sampler, &prompt_tokens, &stop_tokens, options)?;
    report_stop(&output);
    Ok(())
}

// ============================================================================
// Interactive mode
// ============================================================================

fn run_interactive(
    model_path: &str,
    system_prompt: Option<&str>,
    options: &GenerationOptions,
) -> Result<()> {
    let mapped = load_model(model_path)?;
    let model = QuantizedTransformer::from_mapped(&mapped)?;
    check_chat_vocab(&model)?;
    print_config(&model);
    println!();

    if let Some(system) = system_prompt {
        println!("System: {system}");
        println!();
    }
    println!("Chat mode active. Type 'exit' or Ctrl+D to quit.");
    println!("Commands: /clear (reset conversation), /history (show conversation)");
    println!();

    let format = ByteFallbackFormat;
    let stop_tokens: Vec<u32> = format.stop_tokens().into_iter().collect();
    let mut state = InferenceState::new(&model.config);
    let mut sampler = options.build_sampler();
    // Full conversation in token space, stop tokens included
    let mut history: Vec<u32> = Vec::new();

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!(">>> ");
        stdout.flush().ok();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => {
                // EOF (Ctrl+D)
                println!();
                break;
            },
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "exit" || input == "/exit" || input == "/quit" {
                    break;
                }
                if input == "/clear" {
                    state.reset();
                    history.clear();
                    println!("Conversation cleared.");
                    continue;
                }
                if input == "/history" {
                    if history.is_empty() {
                        println!("No history.");
                    } else {
                        println!("{}", format.decode(&history));
                    }
                    continue;
                }

                let mut turn = Vec::new();
                if history.is_empty() {
                    turn.push(format.begin_of_text());
                    if let Some(system) = system_prompt {
                        turn.extend(format.encode_message("system", system));
                    }
                }
                turn.extend(format.encode_message("user", input));
                turn.extend(format.encode_header("assistant"));

                match run_turn(&model, &mut state, &mut sampler, &turn, &stop_tokens, options) {
                    Ok(output) => {
                        history.extend_from_slice(&turn);
                        history.extend_from_slice(&output.tokens);
                        report_stop(&output);
                        println!();
                    },
                    Err(InferirError::ContextLimitExceeded { provided, maximum }) => {
                        println!(
                            "[conversation needs {provided} tokens but the context holds {maximum}; /clear to start fresh]"
                        );
                    },
                    Err(e) => return Err(e),
                }
            },
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            },
        }
    }

    println!("Goodbye!");
    Ok(())
}

// ============================================================================
// One generation turn
// ============================================================================

fn run_turn(
    model: &QuantizedTransformer<'_>,
    state: &mut InferenceState,
    sampler: &mut TokenSampler,
    prompt_tokens: &[u32],
    stop_tokens: &[u32],
    options: &GenerationOptions,
) -> Result<GenerationOutput> {
    let format = ByteFallbackFormat;
    let start = Instant::now();

    let output = if options.stream {
        let mut printer = StreamPrinter::default();
        let mut sink = |token: u32| {
            if let Ok(byte) = u8::try_from(token) {
                printer.push(byte);
            }
            true
        };
        let output = generate(model, state, prompt_tokens, stop_tokens, options, sampler, &mut sink)?;
        printer.finish();
        println!();
        output
    } else {
        let mut sink = |_token: u32| true;
        let output = generate(model, state, prompt_tokens, stop_tokens, options, sampler, &mut sink)?;
        // Specials, the stop token included, decode to nothing
        println!("{}", format.decode(&output.tokens));
        output
    };

    let elapsed = start.elapsed().as_secs_f64();
    #[allow(clippy::cast_precision_loss)]
    let rate = output.count() as f64 / elapsed.max(f64::EPSILON);
    println!("[{} tokens in {elapsed:.2}s, {rate:.1} tok/s]", output.count());
    Ok(output)
}

fn report_stop(output: &GenerationOutput) {
    if output.reason == StopReason::ContextExhausted {
        println!("[ran out of context length]");
    }
}

/// Streams UTF-8 text byte by byte, holding back incomplete multi-byte
/// sequences until they finish.
#[derive(Default)]
struct StreamPrinter {
    pending: Vec<u8>,
}

impl StreamPrinter {
    fn push(&mut self, byte: u8) {
        self.pending.push(byte);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                print!("{text}");
                self.pending.clear();
            },
            Err(e) if e.valid_up_to() > 0 => {
                let valid = e.valid_up_to();
                print!("{}", String::from_utf8_lossy(&self.pending[..valid]));
                self.pending.drain(..valid);
            },
            // A sequence that cannot complete gets flushed lossily
            Err(_) if self.pending.len() >= 4 => self.flush_lossy(),
            Err(_) => {},
        }
        std::io::stdout().flush().ok();
    }

    fn finish(&mut self) {
        if !self.pending.is_empty() {
            self.flush_lossy();
            std::io::stdout().flush().ok();
        }
    }

    fn flush_lossy(&mut self) {
        print!("{}", String::from_utf8_lossy(&self.pending));
        self.pending.clear();
    }
}

// ============================================================================
// Info
// ============================================================================

fn show_checkpoint_info(path: &str) -> Result<()> {
    let mapped = MappedGGUFModel::open(path)?;
    let gguf = &mapped.model;

    println!("Model Information:");
    println!("  Version: {}", gguf.header.version);
    println!("  Tensors: {}", gguf.header.tensor_count);
    println!("  Metadata entries: {}", gguf.header.metadata_kv_count);
    println!("  Alignment: {}", gguf.alignment());
    println!("  Tensor data offset: {}", gguf.tensor_data_start());
    println!("  File size: {}", format_size(mapped.file_size() as u64));
    println!();

    if !gguf.metadata.is_empty() {
        println!("Metadata (first 10 entries):");
        for (key, value) in gguf.metadata.iter().take(10) {
            match value {
                GGUFValue::Array(elements) => println!("  - {key}: [{} entries]", elements.len()),
                other => println!("  - {key}: {other:?}"),
            }
        }
        if gguf.metadata.len() > 10 {
            println!("  ... and {} more", gguf.metadata.len() - 10);
        }
        println!();
    }

    if !gguf.tensors.is_empty() {
        println!("Tensors (first 10):");
        for tensor in gguf.tensors.iter().take(10) {
            let dims: Vec<String> = tensor.dims.iter().map(ToString::to_string).collect();
            println!(
                "  - {} [{}, {:?}]",
                tensor.name,
                dims.join("x"),
                tensor.qtype
            );
        }
        if gguf.tensors.len() > 10 {
            println!("  ... and {} more", gguf.tensors.len() - 10);
        }
    }

    Ok(())
}

fn show_version_info() {
    println!("Inferir v{}", inferir::VERSION);
    println!("Quantized LLM inference engine");
    println!();
    println!("Features:");
    println!("  - GGUF v2/v3 checkpoints, memory-mapped");
    println!("  - F32, F16, Q4_0, Q8_0, Q4_K tensor encodings");
    println!("  - LLaMA-family transformer (RoPE, GQA, SwiGLU)");
    println!("  - Greedy, categorical, and nucleus sampling");
}

/// Format file size in human-readable form
#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
