use super::*;
use crate::{ConfigError, DEFAULT_MEMORY_SIZE};

/// Builds a program from `(label, mnemonic, operands)` rows. Lines are numbered from 1.
fn program(rows: &[(Option<&str>, &str, &[&str])]) -> Program {
    let mut instructions = Vec::new();
    let mut labels = IndexMap::new();
    for (index, (label, mnemonic, operands)) in rows.iter().enumerate() {
        if let Some(label) = label {
            labels.insert(label.to_string(), index);
        }
        instructions.push(InstructionRecord::new(index as u32 + 1, mnemonic, operands));
    }
    Program::new(instructions, labels)
}

fn machine(rows: &[(Option<&str>, &str, &[&str])]) -> Machine {
    let mut machine = Machine::new(MachineConfig::default()).unwrap();
    machine.load(program(rows));
    machine
}

fn run(rows: &[(Option<&str>, &str, &[&str])]) -> Machine {
    let mut machine = machine(rows);
    machine.execute(RunMode::Run).unwrap();
    machine
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = MachineConfig {
        lcd_width: 3,
        ..Default::default()
    };
    assert!(matches!(
        Machine::new(config),
        Err(ConfigError::LcdDimension { .. })
    ));
}

#[test]
fn test_initial_state() {
    let m = Machine::new(MachineConfig::default()).unwrap();
    assert_eq!(m.register(Reg32::Esp), DEFAULT_MEMORY_SIZE);
    assert_eq!(m.state(), MachineState::Runnable);
    assert!(!m.is_running());
    assert_eq!(m.lcd().width(), 32);
}

#[test]
fn test_empty_program_halts_immediately() {
    let mut m = Machine::new(MachineConfig::default()).unwrap();
    assert_eq!(m.step(), Ok(None));
    assert!(m.is_halted());
    assert_eq!(m.step(), Ok(None));
}

#[test]
fn test_loop_runs_body_counter_times() {
    let m = run(&[
        (None, "MOV", &["ECX", "3"]),
        (Some("body"), "DEC", &["EAX"]),
        (None, "LOOP", &["body"]),
        (None, "HLT", &[]),
    ]);
    assert_eq!(m.register(Reg32::Ecx), 0);
    assert_eq!(m.register(Reg32::Eax), 3u32.wrapping_neg());
    assert!(m.is_halted());
    assert_eq!(m.instruction_pointer(), 3);
}

#[test]
fn test_loopne_stops_on_zero_flag() {
    let m = run(&[
        (None, "MOV", &["ECX", "10"]),
        (None, "MOV", &["EAX", "3"]),
        (Some("again"), "DEC", &["EAX"]),
        (None, "LOOPNZ", &["again"]),
        (None, "HLT", &[]),
    ]);
    assert_eq!(m.register(Reg32::Eax), 0);
    assert_eq!(m.register(Reg32::Ecx), 7);
}

#[test]
fn test_divide_by_zero_does_not_fault() {
    let m = run(&[
        (None, "MOV", &["EAX", "100"]),
        (None, "MOV", &["EBX", "0"]),
        (None, "DIV", &["EBX"]),
        (None, "HLT", &[]),
    ]);
    assert_eq!(m.register(Reg32::Eax), 0);
    assert_eq!(m.register(Reg32::Edx), 0);
    assert_eq!(m.state(), MachineState::Halted);
}

#[test]
fn test_conditional_jumps_sum() {
    // Sums 5 + 4 + 3 + 2 + 1 into EAX.
    let m = run(&[
        (None, "MOV", &["ECX", "5"]),
        (None, "XOR", &["EAX", "EAX"]),
        (Some("top"), "ADD", &["EAX", "ECX"]),
        (None, "DEC", &["ECX"]),
        (None, "JNZ", &["top"]),
        (None, "HLT", &[]),
    ]);
    assert_eq!(m.register(Reg32::Eax), 15);
}

#[test]
fn test_signed_and_unsigned_conditions() {
    let m = run(&[
        (None, "MOV", &["EAX", "-1"]),
        (None, "CMP", &["EAX", "1"]),
        (None, "JL", &["signed_less"]),
        (None, "MOV", &["EBX", "1"]),
        (Some("signed_less"), "CMP", &["EAX", "1"]),
        (None, "JA", &["unsigned_above"]),
        (None, "MOV", &["ECX", "1"]),
        (Some("unsigned_above"), "HLT", &[]),
    ]);
    assert_eq!(m.register(Reg32::Ebx), 0);
    assert_eq!(m.register(Reg32::Ecx), 0);
}

#[test]
fn test_call_and_return() {
    let mut m = machine(&[
        (None, "CALL", &["function"]),
        (None, "HLT", &[]),
        (Some("function"), "MOV", &["EAX", "1"]),
        (None, "RET", &[]),
    ]);
    assert_eq!(m.step(), Ok(Some(1)));
    assert_eq!(m.call_stack_depth(), 1);
    assert_eq!(m.instruction_pointer(), 2);
    m.execute(RunMode::Run).unwrap();
    assert_eq!(m.register(Reg32::Eax), 1);
    assert_eq!(m.call_stack_depth(), 0);
    assert_eq!(m.instruction_pointer(), 1);
}

#[test]
fn test_call_does_not_touch_memory_stack() {
    let m = run(&[
        (None, "CALL", &["function"]),
        (None, "HLT", &[]),
        (Some("function"), "RET", &[]),
    ]);
    assert_eq!(m.register(Reg32::Esp), DEFAULT_MEMORY_SIZE);
}

#[test]
fn test_ret_on_empty_call_stack_advances() {
    let mut m = machine(&[(None, "RET", &[]), (None, "MOV", &["EAX", "2"])]);
    assert_eq!(m.step(), Ok(Some(1)));
    assert_eq!(m.instruction_pointer(), 1);
    assert_eq!(m.step(), Ok(Some(2)));
    assert_eq!(m.register(Reg32::Eax), 2);
    assert!(m.is_halted());
}

#[test]
fn test_undefined_label_faults() {
    let mut m = machine(&[
        (None, "MOV", &["ECX", "5"]),
        (None, "CALL", &["undefined_label"]),
    ]);
    m.step().unwrap();

    let err = m.step().unwrap_err();
    assert_eq!(
        err,
        ExecutionError::UndefinedLabel {
            mnemonic: "CALL".to_string(),
            label: "undefined_label".to_string(),
        }
    );
    assert!(err.to_string().contains("undefined_label"));
    assert_eq!(m.instruction_pointer(), 1);
    assert_eq!(m.call_stack_depth(), 0);
    assert_eq!(m.state(), MachineState::Faulted);
    assert_eq!(m.step(), Err(ExecutionError::Faulted));

    m.reset();
    assert_eq!(m.state(), MachineState::Runnable);
}

#[test]
fn test_undefined_loop_label_does_not_decrement() {
    let mut m = machine(&[(None, "LOOP", &["nowhere"])]);
    m.set_register(Reg32::Ecx, 4);
    assert!(m.step().is_err());
    assert_eq!(m.register(Reg32::Ecx), 4);
}

#[test]
fn test_halting_instruction_keeps_pointer() {
    let mut m = machine(&[(None, "NOP", &[]), (None, "HLT", &[]), (None, "NOP", &[])]);
    assert_eq!(m.step(), Ok(Some(1)));
    assert!(m.is_running());
    assert_eq!(m.step(), Ok(Some(2)));
    assert_eq!(m.instruction_pointer(), 1);
    assert!(m.is_halted());
    assert!(!m.is_running());
    assert_eq!(m.step(), Ok(None));
}

#[test]
fn test_running_off_the_end_halts() {
    let mut m = machine(&[(None, "MOV", &["EAX", "1"])]);
    assert_eq!(m.step(), Ok(Some(1)));
    assert!(m.is_halted());
    assert_eq!(m.step(), Ok(None));
}

#[test]
fn test_unknown_instruction_leaves_state() {
    let mut m = machine(&[(None, "FROB", &["EAX"])]);
    assert_eq!(
        m.step(),
        Err(ExecutionError::UnknownInstruction("FROB".to_string()))
    );
    assert_eq!(m.instruction_pointer(), 0);
    assert_eq!(m.state(), MachineState::Runnable);
}

#[test]
fn test_wrong_operand_count_advances() {
    let mut m = machine(&[(None, "MOV", &["EAX"]), (None, "MOV", &["EBX", "1"])]);
    assert_eq!(m.step(), Ok(Some(1)));
    assert_eq!(m.register(Reg32::Eax), 0);
    assert_eq!(m.instruction_pointer(), 1);
}

#[test]
fn test_operand_error_surfaces() {
    let mut m = machine(&[(None, "MOV", &["EAX", "0b12"])]);
    assert!(matches!(m.step(), Err(ExecutionError::Operand(_))));
    assert_eq!(m.instruction_pointer(), 0);
}

#[test]
fn test_console_interrupts() {
    let m = run(&[
        (None, "MOV", &["AH", "0x0E"]),
        (None, "MOV", &["AL", "'O'"]),
        (None, "INT", &["0x10"]),
        (None, "MOV", &["AL", "'K'"]),
        (None, "INT", &["0x10"]),
        (None, "INT", &["0x20"]),
        (None, "MOV", &["EAX", "5"]),
    ]);
    assert_eq!(m.console_output(), "OK");
    assert_ne!(m.register(Reg32::Eax), 5);
}

#[test]
fn test_console_survives_reset() {
    let mut m = run(&[
        (None, "MOV", &["AH", "0x02"]),
        (None, "MOV", &["DL", "'!'"]),
        (None, "INT", &["0x21"]),
    ]);
    m.add_breakpoint(2);
    m.reset();
    assert_eq!(m.console_output(), "!");
    assert_eq!(m.breakpoints().collect::<Vec<_>>(), vec![2]);
    assert_eq!(m.program().len(), 3);
    assert_eq!(m.register(Reg32::Edx), 0);

    m.clear_console();
    assert_eq!(m.console_output(), "");
}

#[test]
fn test_load_keeps_registers_and_memory() {
    let mut m = Machine::new(MachineConfig::default()).unwrap();
    m.set_register(Reg32::Esi, 0x100);
    m.write_byte_a(0x100, 42).unwrap();
    m.load(program(&[(None, "LODSB", &[])]));
    m.execute(RunMode::Run).unwrap();
    assert_eq!(m.register8(Reg8::Al), 42);
    assert_eq!(m.register(Reg32::Esi), 0x101);

    m.load(program(&[(None, "NOP", &[])]));
    assert_eq!(m.state(), MachineState::Runnable);
    assert_eq!(m.instruction_pointer(), 0);
    assert_eq!(m.register8(Reg8::Al), 42);
}

#[test]
fn test_push_pop_lifo() {
    let m = run(&[
        (None, "MOV", &["EAX", "1"]),
        (None, "MOV", &["EBX", "2"]),
        (None, "PUSH", &["EAX"]),
        (None, "PUSH", &["EBX"]),
        (None, "POP", &["EAX"]),
        (None, "POP", &["EBX"]),
        (None, "HLT", &[]),
    ]);
    assert_eq!(m.register(Reg32::Eax), 2);
    assert_eq!(m.register(Reg32::Ebx), 1);
    assert_eq!(m.register(Reg32::Esp), DEFAULT_MEMORY_SIZE);
    assert_eq!(m.read_u32_a(DEFAULT_MEMORY_SIZE - 4), 1);
}

#[test]
fn test_mode_switch_changes_multiply_flags() {
    let rows: &[(Option<&str>, &str, &[&str])] = &[
        (None, "MOV", &["EAX", "0x80000000"]),
        (None, "MOV", &["EBX", "2"]),
        (None, "MUL", &["EBX"]),
    ];

    let teaching = run(rows);
    let mut strict = machine(rows);
    strict.set_mode(CompatibilityMode::Strict);
    strict.execute(RunMode::Run).unwrap();

    assert_eq!(teaching.register(Reg32::Edx), 1);
    assert_eq!(strict.register(Reg32::Edx), 1);
    assert!(teaching.flags().zero());
    assert!(!strict.flags().zero());
    assert_eq!(teaching.flags().carry(), strict.flags().carry());
    assert_eq!(teaching.flags().overflow(), strict.flags().overflow());
}

#[test]
fn test_strict_mode_rejects_memory_to_memory_move() {
    let config = MachineConfig {
        mode: CompatibilityMode::Strict,
        ..Default::default()
    };
    let mut m = Machine::new(config).unwrap();
    m.load(program(&[(None, "MOV", &["[0x10]", "[0x20]"])]));
    assert_eq!(m.step(), Err(ExecutionError::MemoryToMemoryMove));
    assert_eq!(m.mode(), CompatibilityMode::Strict);
}

#[test]
fn test_lcd_and_keyboard() {
    let mut m = machine(&[
        (None, "MOV", &["EBX", "0x10000"]),
        (None, "MOV", &["BYTE [EBX+33]", "0xFF"]),
        (None, "MOVZX", &["EAX", "BYTE [0x20010]"]),
        (None, "MOVZX", &["ECX", "BYTE [0x20011]"]),
        (None, "MOVZX", &["EDX", "BYTE [0x20012]"]),
        (None, "HLT", &[]),
    ]);
    m.push_key_event(KeyEvent {
        keycode: b'w',
        pressed: true,
    });
    m.execute(RunMode::Run).unwrap();

    assert_eq!(m.lcd().pixel(1, 1), Some(0xFF));
    assert_eq!(m.register(Reg32::Eax), 1);
    assert_eq!(m.register(Reg32::Ecx), u32::from(b'w'));
    assert_eq!(m.register(Reg32::Edx), 1);
    assert_eq!(m.keyboard_status(), 0);
    assert_eq!(m.keyboard_keycode(), b'w');
    assert_eq!(m.keyboard_keystate(), 1);
}

#[test]
fn test_dword_device_access_touches_one_register() {
    let mut m = machine(&[
        (None, "MOV", &["EAX", "[0x20010]"]),
        (None, "MOV", &["[0x10001]", "5"]),
        (None, "MOV", &["[0x10000]", "7"]),
        (None, "MOV", &["ECX", "[0x20011]"]),
        (None, "HLT", &[]),
    ]);
    m.push_key_event(KeyEvent {
        keycode: b'w',
        pressed: true,
    });
    m.execute(RunMode::Run).unwrap();

    assert_eq!(m.register(Reg32::Eax), 1);
    assert_eq!(m.register(Reg32::Ecx), u32::from(b'w'));
    assert_eq!(&m.lcd().pixels()[..3], &[7, 5, 0]);
    assert_eq!(m.keyboard_status(), 0);
}

#[test]
fn test_unknown_io_address() {
    let mut m = machine(&[(None, "MOV", &["EAX", "[0x20000]"])]);
    assert_eq!(m.step(), Err(ExecutionError::UnknownIoAddress(0x20000)));
}

#[test]
fn test_bank_b_is_separate() {
    let mut m = Machine::new(MachineConfig::default()).unwrap();
    m.write_u32_b(0x40, 0xCAFE_BABE).unwrap();
    assert_eq!(m.read_u32_b(0x40), 0xCAFE_BABE);
    assert_eq!(m.read_byte_b(0x40), 0xBE);
    assert_eq!(m.memory_b(0x40..0x42), &[0xBE, 0xBA]);
    assert_eq!(m.read_u32_a(0x40), 0);

    m.load(program(&[(None, "MOV", &["EAX", "[0x40]"])]));
    m.step().unwrap();
    assert_eq!(m.register(Reg32::Eax), 0);

    m.write_byte_b(1, 1).unwrap();
    assert!(m.write_byte_b(DEFAULT_MEMORY_SIZE, 1).is_err());
}

#[test]
fn test_register_accessors() {
    let mut m = Machine::new(MachineConfig::default()).unwrap();
    m.set_register(Reg32::Ebx, 0x1234_5678);
    assert_eq!(m.register_by_name("ebx"), Some(0x1234_5678));
    assert_eq!(m.register_by_name("BH"), Some(0x56));
    assert_eq!(m.register_by_name("bl"), Some(0x78));
    assert_eq!(m.register_by_name("r9"), None);

    m.set_register8(Reg8::Bh, 0);
    assert_eq!(m.register(Reg32::Ebx), 0x1234_0078);
}

#[test]
fn test_snapshot() {
    let mut m = machine(&[
        (None, "CALL", &["f"]),
        (None, "HLT", &[]),
        (Some("f"), "STC", &[]),
        (None, "RET", &[]),
    ]);
    m.step().unwrap();
    m.step().unwrap();
    let snapshot = m.snapshot();
    assert_eq!(snapshot.instruction_pointer, 3);
    assert_eq!(snapshot.call_stack_depth, 1);
    assert!(snapshot.flags.carry());
    assert!(snapshot.running);
    assert!(!snapshot.halted);
    assert_eq!(snapshot.registers[Reg32::Esp.index()], DEFAULT_MEMORY_SIZE);
}

#[test]
fn test_run_for_limits_steps() {
    let mut m = machine(&[(Some("spin"), "JMP", &["spin"])]);
    let stats = m.execute(RunMode::RunFor(10)).unwrap();
    assert_eq!(stats.steps, 10);
    assert_eq!(stats.stop, StopReason::StepLimit);
    assert_eq!(stats.last_line, Some(1));
    assert!(!m.is_halted());
}

#[test]
fn test_run_until_breakpoint() {
    let mut m = machine(&[
        (None, "MOV", &["EAX", "1"]),
        (None, "MOV", &["EAX", "2"]),
        (None, "MOV", &["EAX", "3"]),
        (None, "HLT", &[]),
    ]);
    assert!(m.add_breakpoint(2));
    assert!(!m.add_breakpoint(2));

    let stats = m.execute(RunMode::UntilBreakpoint).unwrap();
    assert_eq!(stats.stop, StopReason::Breakpoint(2));
    assert_eq!(m.register(Reg32::Eax), 2);

    assert!(m.remove_breakpoint(2));
    let stats = m.execute(RunMode::UntilBreakpoint).unwrap();
    assert_eq!(stats.stop, StopReason::Halted);
    assert_eq!(stats.last_line, Some(4));
    assert_eq!(m.register(Reg32::Eax), 3);
}

#[test]
fn test_breakpoints_do_not_affect_step() {
    let mut m = machine(&[(None, "NOP", &[]), (None, "NOP", &[])]);
    m.add_breakpoint(1);
    assert_eq!(m.step(), Ok(Some(1)));
    assert_eq!(m.step(), Ok(Some(2)));
}

#[test]
fn test_execute_instruction_outside_program() {
    let mut m = Machine::new(MachineConfig::default()).unwrap();
    let record = InstructionRecord::new(0, "mov", &["eax", "7"]);
    assert_eq!(m.execute_instruction(&record), Ok(Dispatch::Executed));
    assert_eq!(m.register(Reg32::Eax), 7);
    assert_eq!(m.instruction_pointer(), 0);
}

#[test]
fn test_string_copy_program() {
    let mut m = Machine::new(MachineConfig::default()).unwrap();
    for (i, b) in b"abc".iter().enumerate() {
        m.write_byte_a(0x200 + i as u32, *b).unwrap();
    }
    m.load(program(&[
        (None, "MOV", &["ESI", "0x200"]),
        (None, "MOV", &["EDI", "0x300"]),
        (None, "MOV", &["ECX", "3"]),
        (Some("copy"), "MOVSB", &[]),
        (None, "LOOP", &["copy"]),
        (None, "HLT", &[]),
    ]));
    m.execute(RunMode::Run).unwrap();
    assert_eq!(m.memory_a(0x300..0x303), b"abc");
}
