//! ND100 Emulator - CLI Entry Point
//!
//! Commands:
//! - `nd100-emu run <image>` - Load a BP or BPUN image and run it
//! - `nd100-emu disasm <image>` - Disassemble a BP image
//! - `nd100-emu selftest` - Run a tiny built-in program

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use nd100::config::{parse_address, parse_number};
use nd100::cpu::PhysicalMemory;
use nd100::{disasm, loader, BootKind, Cpu, CpuModel, MachineConfig, Overrides, StopReason};

#[derive(Parser)]
#[command(name = "nd100-emu")]
#[command(version = "0.1.0")]
#[command(about = "CPU core emulator for the Norsk Data ND100/ND110 minicomputers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an image and run until the CPU stops
    Run {
        /// Path to the BP or BPUN image
        image: PathBuf,
        /// JSON machine configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// CPU model (nd100, nd100ce, nd100cx, nd110, nd110ce, nd110cx, nd110pcx)
        #[arg(short, long)]
        model: Option<String>,
        /// The image is a BPUN punched-tape block
        #[arg(long)]
        bpun: bool,
        /// Initial P (octal with a leading 0)
        #[arg(long, value_parser = parse_address)]
        start: Option<u16>,
        /// First word address of a BP image
        #[arg(long, value_parser = parse_address)]
        load_address: Option<u16>,
        /// Stop after this many instructions
        #[arg(long, value_parser = parse_number)]
        max_instructions: Option<u64>,
        /// Stop when P reaches this address
        #[arg(long, value_parser = parse_address)]
        breakpoint: Option<u16>,
        /// Log every instruction
        #[arg(short, long)]
        trace: bool,
        /// Print the final machine state as JSON
        #[arg(long)]
        dump_state: bool,
    },
    /// Disassemble a BP image
    Disasm {
        /// Path to the BP image
        image: PathBuf,
        /// First address to list
        #[arg(long, value_parser = parse_address, default_value = "0")]
        start: u16,
        /// Number of words to list
        #[arg(short = 'n', long, value_parser = parse_number, default_value = "64")]
        count: u64,
        /// CPU model
        #[arg(short, long, default_value = "nd100")]
        model: String,
    },
    /// Run the built-in self-test
    Selftest,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            image,
            config,
            model,
            bpun,
            start,
            load_address,
            max_instructions,
            breakpoint,
            trace,
            dump_state,
        } => {
            let overrides = Overrides {
                cpu_type: model,
                boot: bpun.then_some(BootKind::Bpun),
                image: Some(image),
                start,
                load_address,
                breakpoint,
                instruction_limit: max_instructions,
                trace,
            };
            run_image(config, &overrides, dump_state);
        }
        Commands::Disasm { image, start, count, model } => {
            init_logging(false);
            disassemble_file(&image, start, count, &model);
        }
        Commands::Selftest => {
            init_logging(false);
            run_self_test();
        }
    }
}

fn init_logging(trace: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if trace {
        builder.filter_module("nd100", LevelFilter::Trace);
    }
    builder.init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {}", message);
    std::process::exit(1);
}

fn run_image(config: Option<PathBuf>, overrides: &Overrides, dump_state: bool) {
    let mut cfg = match config {
        Some(path) => MachineConfig::load(&path).unwrap_or_else(|e| fail(e)),
        None => MachineConfig::default(),
    };
    if let Err(e) = cfg.apply(overrides) {
        fail(e);
    }
    init_logging(cfg.trace);

    let Some(image) = cfg.image.clone() else {
        fail("no image given");
    };

    let mut cpu = Cpu::new(cfg.cpu_type);
    let loaded = loader::load_file(&mut cpu, &image, cfg.boot, cfg.load_address)
        .unwrap_or_else(|e| fail(e));
    println!(
        "Loaded {} words from {} ({}, {})",
        loaded.word_count(),
        image.display(),
        cfg.boot,
        cfg.cpu_type
    );
    if let loader::Loaded::Bpun(block) = &loaded {
        if !block.checksum_ok {
            println!("warning: BPUN checksum mismatch");
        }
    }

    cpu.jump(cfg.start);
    let control = cpu.control();
    if cfg.is_semi_run() {
        control.semi_run(cfg.breakpoint, cfg.instruction_limit);
    } else {
        control.start();
    }

    let reason = cpu.run().unwrap_or_else(|e| fail(e));

    println!();
    println!("Stopped: {}", reason);
    println!("Instructions: {}", cpu.cycles());
    println!("Level: {}", cpu.regs.level());
    println!(
        "P={:06o} A={:06o} D={:06o} T={:06o} X={:06o} B={:06o} L={:06o} STS={:06o}",
        cpu.regs.p(),
        cpu.regs.a(),
        cpu.regs.d(),
        cpu.regs.t(),
        cpu.regs.x(),
        cpu.regs.b(),
        cpu.regs.l(),
        cpu.regs.sts()
    );

    if dump_state {
        let snapshot = cpu.snapshot().unwrap_or_else(|e| fail(e));
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => println!("{}", json),
            Err(e) => fail(e),
        }
    }
}

fn disassemble_file(path: &Path, start: u16, count: u64, model: &str) {
    let model: CpuModel = model.parse().unwrap_or_else(|e| fail(e));
    let words = loader::read_words(path).unwrap_or_else(|e| fail(e));
    let first = (start as usize).min(words.len());
    let last = first.saturating_add(count as usize).min(words.len());
    print!("{}", disasm::disassemble(&words[first..last], start, model));
}

fn run_self_test() {
    println!("━━━ ND100 Emulator Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    // SAA 5; AAA 3; STA *2; WAIT; (data)
    let program = [0o170405, 0o172403, 0o004002, 0o151000, 0];
    let mut cpu = Cpu::with_memory(CpuModel::Nd100, PhysicalMemory::with_pages(4));
    for (i, word) in program.iter().enumerate() {
        cpu.physical_write(i as u32, *word);
    }
    let result = cpu.run_limited(100);

    print!("Program stops on WAIT... ");
    if matches!(result, Ok(StopReason::Wait)) {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ ({:?})", result);
        failed += 1;
    }

    print!("Argument add... ");
    if cpu.regs.a() == 8 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ (got {}, expected 8)", cpu.regs.a());
        failed += 1;
    }

    print!("P-relative store... ");
    if cpu.physical_read(4) == 8 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ (got {}, expected 8)", cpu.physical_read(4));
        failed += 1;
    }

    print!("Disassembler... ");
    let text = disasm::format(program[2], CpuModel::Nd100);
    if text == "STA * 2" {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ (got '{}')", text);
        failed += 1;
    }

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
