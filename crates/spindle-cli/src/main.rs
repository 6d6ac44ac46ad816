use clap::{Args, Parser, Subcommand};
use log::info;
use spindle_kernel::KernelConfig;
use spindle_runtime::{Runtime, DEMO_SCRIPT};
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workload script
    Run {
        /// Path to the script
        script: PathBuf,

        #[command(flatten)]
        kernel: KernelArgs,
    },
    /// Run the built-in demonstration script
    Demo {
        #[command(flatten)]
        kernel: KernelArgs,
    },
}

#[derive(Args)]
struct KernelArgs {
    /// System pool size in bytes
    #[arg(long, default_value_t = KernelConfig::default().system_heap_size)]
    heap: usize,

    /// Shared I/O pool size in bytes
    #[arg(long, default_value_t = KernelConfig::default().shared_memory_size)]
    shared: usize,

    /// Ticks a thread runs before an equal-priority thread gets a turn
    #[arg(long, default_value_t = KernelConfig::default().quantum_ticks)]
    quantum: u32,

    /// Timer period in milliseconds
    #[arg(long, default_value_t = KernelConfig::default().tick_interval_ms)]
    tick_ms: u64,
}

impl KernelArgs {
    fn config(&self) -> KernelConfig {
        KernelConfig {
            system_heap_size: self.heap,
            shared_memory_size: self.shared,
            quantum_ticks: self.quantum,
            tick_interval_ms: self.tick_ms,
            ..KernelConfig::default()
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();

    let mut runtime = match cli.command {
        Commands::Run { script, kernel } => {
            println!("Loading script: {:?}", script);
            let mut runtime = Runtime::new(kernel.config())?;
            runtime.load_program(&script)?;
            runtime
        }
        Commands::Demo { kernel } => {
            let mut runtime = Runtime::new(kernel.config())?;
            runtime.load_source(DEMO_SCRIPT)?;
            runtime
        }
    };

    runtime.run()?;
    for line in runtime.transcript() {
        println!("{}", line);
    }
    info!("{} ticks elapsed", runtime.kernel().ticks());
    println!("Execution completed.");

    Ok(())
}
