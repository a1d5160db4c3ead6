use std::collections::HashMap;

use indexmap::IndexMap;
use thiserror::Error;
use tiny86_common::{InstructionRecord, Mnemonic, Program};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AssemblerError {
    #[error("line {line}: Unknown instruction: {mnemonic}")]
    UnknownInstruction { line: u32, mnemonic: String },
    #[error("line {line}: Duplicate label: {label}")]
    DuplicateLabel { line: u32, label: String },
    #[error("line {line}: Invalid label: {label}")]
    InvalidLabel { line: u32, label: String },
    #[error("line {line}: Malformed line: {text}")]
    MalformedLine { line: u32, text: String },
}

/// Turns source text into instruction records and a label table.
///
/// Operands are kept as tokens; the engine resolves them when it executes the
/// record, so the assembler only checks the line structure and the mnemonic.
#[derive(Debug, Default)]
pub struct Assembler {
    labels: IndexMap<String, usize>,
    instructions: Vec<InstructionRecord>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assemble_line(&mut self, line: u32, source: &str) -> Result<(), AssemblerError> {
        let code = strip_comment(source).trim();
        if code.is_empty() {
            return Ok(());
        }

        let code = match split_label(code) {
            Some((label, rest)) => {
                self.define_label(line, label)?;
                rest.trim()
            }
            None => code,
        };
        if code.is_empty() {
            return Ok(());
        }

        let (mnemonic, operand_text) = match code.split_once(char::is_whitespace) {
            Some((mnemonic, rest)) => (mnemonic, rest.trim()),
            None => (code, ""),
        };

        if mnemonic.parse::<Mnemonic>().is_err() {
            return Err(AssemblerError::UnknownInstruction {
                line,
                mnemonic: mnemonic.to_string(),
            });
        }

        let operands = split_operands(operand_text).ok_or_else(|| AssemblerError::MalformedLine {
            line,
            text: source.trim().to_string(),
        })?;

        self.instructions.push(InstructionRecord {
            line,
            mnemonic: mnemonic.to_string(),
            operands,
            text: code.to_string(),
        });
        Ok(())
    }

    fn define_label(&mut self, line: u32, label: &str) -> Result<(), AssemblerError> {
        if !is_valid_label(label) {
            return Err(AssemblerError::InvalidLabel {
                line,
                label: label.to_string(),
            });
        }
        if self.labels.contains_key(label) {
            return Err(AssemblerError::DuplicateLabel {
                line,
                label: label.to_string(),
            });
        }
        self.labels
            .insert(label.to_string(), self.instructions.len());
        Ok(())
    }

    pub fn assemble_program(mut self, program: &str) -> Result<Program, AssemblerError> {
        for (index, source) in program.lines().enumerate() {
            self.assemble_line(index as u32 + 1, source)?;
        }
        Ok(Program::new(self.instructions, self.labels))
    }
}

/// Assembles a whole source text with a fresh assembler.
pub fn assemble(program: &str) -> Result<Program, AssemblerError> {
    Assembler::new().assemble_program(program)
}

/// Scans `text`, calling `f` with each byte index and character that is not
/// inside a character literal.
fn for_each_unquoted(text: &str, mut f: impl FnMut(usize, char) -> bool) -> bool {
    let mut in_quote = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_quote {
            match (escaped, c) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '\'') => in_quote = false,
                _ => {}
            }
            continue;
        }
        if c == '\'' {
            in_quote = true;
            continue;
        }
        if !f(i, c) {
            return false;
        }
    }
    !in_quote
}

fn strip_comment(line: &str) -> &str {
    let mut end = line.len();
    for_each_unquoted(line, |i, c| {
        if c == ';' {
            end = i;
            return false;
        }
        true
    });
    &line[..end]
}

fn split_label(code: &str) -> Option<(&str, &str)> {
    let mut colon = None;
    for_each_unquoted(code, |i, c| {
        if c == ':' {
            colon = Some(i);
            return false;
        }
        true
    });
    colon.map(|i| (code[..i].trim(), &code[i + 1..]))
}

fn is_valid_label(label: &str) -> bool {
    let mut chars = label.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Splits on commas outside brackets and character literals. `None` for an
/// empty operand, an unbalanced bracket or an unterminated literal.
fn split_operands(text: &str) -> Option<Vec<String>> {
    if text.is_empty() {
        return Some(Vec::new());
    }

    let mut cuts = Vec::new();
    let mut depth = 0i32;
    let terminated = for_each_unquoted(text, |i, c| {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            ',' if depth == 0 => cuts.push(i),
            _ => {}
        }
        depth >= 0
    });
    if !terminated || depth != 0 {
        return None;
    }

    let mut operands = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for end in cuts.into_iter().chain(std::iter::once(text.len())) {
        let operand = text[start..end].trim();
        if operand.is_empty() {
            return None;
        }
        operands.push(operand.to_string());
        start = end + 1;
    }
    Some(operands)
}

/// Renders a program back into canonical source form.
pub struct Disassembler {
    labels: HashMap<usize, Vec<String>>,
}

impl Disassembler {
    pub fn from_program(program: &Program) -> Self {
        let mut labels: HashMap<usize, Vec<String>> = HashMap::new();
        for (name, &index) in &program.labels {
            labels.entry(index).or_default().push(name.clone());
        }
        Self { labels }
    }

    fn push_labels(&self, index: usize, out: &mut String) {
        for label in self.labels.get(&index).into_iter().flatten() {
            out.push_str(label);
            out.push_str(":\n");
        }
    }

    pub fn disassemble_instruction(&self, record: &InstructionRecord) -> String {
        let mnemonic = record
            .mnemonic
            .parse::<Mnemonic>()
            .map(|m| m.to_string())
            .unwrap_or_else(|_| record.mnemonic.to_uppercase());
        if record.operands.is_empty() {
            mnemonic
        } else {
            format!("{mnemonic} {}", record.operands.join(", "))
        }
    }

    pub fn disassemble_program(&self, program: &Program) -> String {
        let mut result = String::new();
        for (index, record) in program.instructions.iter().enumerate() {
            self.push_labels(index, &mut result);
            result.push_str("    ");
            result.push_str(&self.disassemble_instruction(record));
            result.push('\n');
        }

        // Labels may point one past the last instruction.
        let mut trailing: Vec<_> = self
            .labels
            .keys()
            .copied()
            .filter(|&index| index >= program.instructions.len())
            .collect();
        trailing.sort_unstable();
        for index in trailing {
            self.push_labels(index, &mut result);
        }
        result
    }
}
