use clap::Parser;
use std::path::PathBuf;
use tiny86_assembler::{Assembler, Disassembler};
use tiny86_common::{ProgramFile, ProgramFileHeader};

#[derive(Parser)]
struct Args {
    input: PathBuf,
    output: PathBuf,
    /// Read a program file and write its source listing instead
    #[clap(long, short)]
    disassemble: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Args {
        input,
        output,
        disassemble,
    } = Args::parse();

    if disassemble {
        let file = ProgramFile::load(input)?;
        let disassembler = Disassembler::from_program(&file.program);
        let code = disassembler.disassemble_program(&file.program);
        std::fs::write(&output, code)
            .map_err(|e| format!("Failed to write output file '{}': {e}", output.display()))?;
    } else {
        let source = std::fs::read_to_string(&input)?;
        let program = Assembler::new().assemble_program(&source)?;
        let file = ProgramFile {
            header: ProgramFileHeader {
                source: input.display().to_string(),
            },
            program,
        };
        file.save(output)?;
    }

    Ok(())
}
