use std::path::PathBuf;

use clap::{Parser, Subcommand};
use slog::{o, Drain, Level, Logger};
use slog_term::{FullFormat, TermDecorator};
use tiny86_common::{
    native::Machine, CompatibilityMode, MachineConfig, Program, ProgramFile, RunMode,
};

#[cfg(feature = "experimental_ui")]
use macroquad::prelude::*;

#[cfg(feature = "experimental_ui")]
use macroquad::ui::root_ui;

#[cfg(feature = "experimental_ui")]
use tiny86_common::native::KeyEvent;

#[cfg(not(feature = "experimental_ui"))]
use macroquad::prelude::Conf;

#[derive(Parser)]
struct Args {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(short, long, global = true)]
    show_cpu_state: bool,
    /// Hardware flag semantics instead of the teaching ones
    #[arg(long, global = true)]
    strict: bool,
    #[arg(short, long, global = true, default_value = "65536")]
    memory_size: u32,
    #[arg(long, global = true, default_value = "32")]
    lcd_width: u32,
    #[arg(long, global = true, default_value = "32")]
    lcd_height: u32,
    /// Stop after this many instructions even if the program has not halted
    #[arg(long, global = true)]
    max_steps: Option<usize>,
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    #[cfg(feature = "experimental_ui")]
    Gui {
        path: PathBuf,
        #[arg(long, default_value = "1000")]
        steps_per_frame: usize,
    },
    /// Run an assembled program file
    Run { path: PathBuf },
    /// Assemble a source file and run it
    RunAsm { path: PathBuf },
}

fn load_program(path: PathBuf, assemble: bool) -> anyhow::Result<Program> {
    if assemble {
        let source = std::fs::read_to_string(path)?;
        Ok(tiny86_assembler::assemble(&source)?)
    } else {
        Ok(ProgramFile::load(path)?.program)
    }
}

fn run(
    mut machine: Machine,
    program: Program,
    max_steps: Option<usize>,
    show_cpu_state: bool,
) -> anyhow::Result<()> {
    machine.load(program);

    let run_mode = max_steps.map_or(RunMode::Run, RunMode::RunFor);
    let result = machine.execute(run_mode);

    let console = machine.console_output();
    if !console.is_empty() {
        println!("{console}");
    }

    println!();
    println!("========== RESULT/STATS ===========");
    println!();

    println!("{:#?}", result);

    if show_cpu_state {
        machine.print_state();
    }

    result?;
    Ok(())
}

#[cfg(feature = "experimental_ui")]
fn pixel_color(value: u8) -> Color {
    Color::from_rgba(value, value, value, 255)
}

/// Letters and digits map to their ASCII codes, arrows to the usual virtual-key codes.
#[cfg(feature = "experimental_ui")]
fn keycode(key: KeyCode) -> Option<u8> {
    use KeyCode::*;

    const LETTERS: [KeyCode; 26] = [
        A, B, C, D, E, F, G, H, I, J, K, L, M, N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    ];
    const DIGITS: [KeyCode; 10] = [Key0, Key1, Key2, Key3, Key4, Key5, Key6, Key7, Key8, Key9];

    if let Some(i) = LETTERS.iter().position(|&k| k == key) {
        return Some(b'A' + i as u8);
    }
    if let Some(i) = DIGITS.iter().position(|&k| k == key) {
        return Some(b'0' + i as u8);
    }
    match key {
        Space => Some(b' '),
        Enter => Some(13),
        Escape => Some(27),
        Backspace => Some(8),
        Left => Some(37),
        Up => Some(38),
        Right => Some(39),
        Down => Some(40),
        _ => None,
    }
}

#[cfg(feature = "experimental_ui")]
fn push_keys(machine: &mut Machine) {
    let events = get_keys_pressed()
        .into_iter()
        .map(|key| (key, true))
        .chain(get_keys_released().into_iter().map(|key| (key, false)));
    for (key, pressed) in events {
        if let Some(keycode) = keycode(key) {
            machine.push_key_event(KeyEvent { keycode, pressed });
        }
    }
}

#[cfg(feature = "experimental_ui")]
async fn run_gui(
    mut machine: Machine,
    program: Program,
    steps_per_frame: usize,
) -> anyhow::Result<()> {
    machine.load(program);

    let mut paused = true;
    let mut running = true;
    while running {
        clear_background(DARKGRAY);

        if if paused {
            root_ui().button(None, "Unpause")
        } else {
            root_ui().button(None, "Pause")
        } {
            paused = !paused;
        }

        if root_ui().button(None, "Stop") {
            running = false;
        }

        push_keys(&mut machine);

        if !paused && !machine.is_halted() {
            machine.execute(RunMode::RunFor(steps_per_frame))?;
        }

        let lcd = machine.lcd();
        let top = 40.0;
        let side = screen_width().min(screen_height() - top * 2.0);
        let cell_w = side / lcd.width() as f32;
        let cell_h = side / lcd.height() as f32;
        let left = (screen_width() - side) / 2.0;
        for y in 0..lcd.height() {
            for x in 0..lcd.width() {
                let value = lcd.pixel(x, y).unwrap_or(0);
                draw_rectangle(
                    left + x as f32 * cell_w,
                    top + y as f32 * cell_h,
                    cell_w,
                    cell_h,
                    pixel_color(value),
                );
            }
        }

        let status = format!("{:?}  {}", machine.state(), machine.console_output());
        draw_text(&status, 10.0, screen_height() - 12.0, 20.0, WHITE);

        next_frame().await
    }

    Ok(())
}

fn conf() -> Conf {
    Conf {
        window_title: "tiny86".to_string(),
        window_width: 800,
        window_height: 600,
        ..Default::default()
    }
}

fn logger(verbose: bool) -> (Logger, slog_async::AsyncGuard) {
    let level = if verbose { Level::Trace } else { Level::Info };
    let decorator = TermDecorator::new().build();
    let drain = FullFormat::new(decorator).build().fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    let drain = drain.filter_level(level).fuse();
    (Logger::root(drain, o!()), guard)
}

#[macroquad::main(conf)]
async fn main() -> anyhow::Result<()> {
    let Args {
        action,
        verbose,
        show_cpu_state,
        strict,
        memory_size,
        lcd_width,
        lcd_height,
        max_steps,
    } = Args::parse();

    let config = MachineConfig {
        memory_size,
        lcd_width,
        lcd_height,
        mode: if strict {
            CompatibilityMode::Strict
        } else {
            CompatibilityMode::Teaching
        },
    };

    let (logger, _guard) = logger(verbose);
    let machine = Machine::with_logger(config, logger)?;

    match action {
        #[cfg(feature = "experimental_ui")]
        Action::Gui {
            path,
            steps_per_frame,
        } => {
            let program = load_program(path, true)?;
            run_gui(machine, program, steps_per_frame).await?;
        }
        Action::Run { path } => {
            run(machine, load_program(path, false)?, max_steps, show_cpu_state)?;
        }
        Action::RunAsm { path } => {
            run(machine, load_program(path, true)?, max_steps, show_cpu_state)?;
        }
    }

    Ok(())
}
