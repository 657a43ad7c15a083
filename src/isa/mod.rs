//! Instruction set: decode/encode for the nine PIO opcodes, plus
//! disassembly/assembly for diagnostics and round-tripping.
//!
//! The raw 16-bit word layout follows the RP2040 datasheet (Sect. 3.4):
//! bits 15:13 opcode, bits 12:8 delay/side-set, bits 7:0 opcode payload.
//! Bitfields use the `bitbybit`/`arbitrary-int` style of
//! `us-irs-vorago-shared-hal/src/spi/regs.rs`, generalized from
//! memory-mapped register layouts to instruction-word layouts.

pub mod exec;

use crate::error::DecodeError;
use arbitrary_int::{u2, u3, u5};
use bitbybit::{bitenum, bitfield};

#[bitenum(u3, exhaustive = true)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Jmp = 0,
    Wait = 1,
    In = 2,
    Out = 3,
    PushPull = 4,
    Mov = 5,
    Irq = 6,
    Set = 7,
}

#[bitfield(u16, default = 0)]
struct RawInstr {
    #[bits(13..=15, rw)]
    opcode: Opcode,
    #[bits(8..=12, rw)]
    delay_sideset: u5,
    #[bits(0..=7, rw)]
    payload: u8,
}

#[bitenum(u3, exhaustive = true)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JmpCond {
    Always = 0,
    XIsZero = 1,
    XDec = 2,
    YIsZero = 3,
    YDec = 4,
    XNeY = 5,
    Pin = 6,
    OsrNotEmpty = 7,
}

#[bitfield(u8, default = 0)]
struct JmpPayload {
    #[bits(5..=7, rw)]
    cond: JmpCond,
    #[bits(0..=4, rw)]
    addr: u5,
}

#[bitenum(u2, exhaustive = false)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSrc {
    Gpio = 0,
    Pin = 1,
    Irq = 2,
}

#[bitfield(u8, default = 0)]
struct WaitPayload {
    #[bit(7, rw)]
    polarity: bool,
    #[bits(5..=6, rw)]
    src: Option<WaitSrc>,
    #[bits(0..=4, rw)]
    index: u5,
}

#[bitenum(u3, exhaustive = false)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InSrc {
    Pins = 0,
    X = 1,
    Y = 2,
    Null = 3,
    Isr = 6,
    Osr = 7,
}

#[bitfield(u8, default = 0)]
struct InPayload {
    #[bits(5..=7, rw)]
    src: Option<InSrc>,
    #[bits(0..=4, rw)]
    count: u5,
}

#[bitenum(u3, exhaustive = true)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutDst {
    Pins = 0,
    X = 1,
    Y = 2,
    Null = 3,
    PinDirs = 4,
    Pc = 5,
    Isr = 6,
    Exec = 7,
}

#[bitfield(u8, default = 0)]
struct OutPayload {
    #[bits(5..=7, rw)]
    dst: OutDst,
    #[bits(0..=4, rw)]
    count: u5,
}

#[bitfield(u8, default = 0)]
struct PushPullPayload {
    #[bit(7, rw)]
    is_pull: bool,
    #[bit(6, rw)]
    if_full_or_empty: bool,
    #[bit(5, rw)]
    block: bool,
}

#[bitenum(u3, exhaustive = false)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovDst {
    Pins = 0,
    X = 1,
    Y = 2,
    Exec = 3,
    Pc = 4,
    Isr = 5,
    Osr = 6,
}

#[bitenum(u2, exhaustive = false)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovOp {
    None = 0,
    Invert = 1,
    BitReverse = 2,
}

#[bitenum(u3, exhaustive = false)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovSrc {
    Pins = 0,
    X = 1,
    Y = 2,
    Null = 3,
    Status = 5,
    Isr = 6,
    Osr = 7,
}

#[bitfield(u8, default = 0)]
struct MovPayload {
    #[bits(5..=7, rw)]
    dst: Option<MovDst>,
    #[bits(3..=4, rw)]
    op: Option<MovOp>,
    #[bits(0..=2, rw)]
    src: Option<MovSrc>,
}

#[bitfield(u8, default = 0)]
struct IrqPayload {
    #[bit(7, rw)]
    reserved: bool,
    #[bit(6, rw)]
    clear: bool,
    #[bit(5, rw)]
    wait: bool,
    #[bits(0..=4, rw)]
    index: u5,
}

#[bitenum(u3, exhaustive = false)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetDst {
    Pins = 0,
    X = 1,
    Y = 2,
    PinDirs = 4,
}

#[bitfield(u8, default = 0)]
struct SetPayload {
    #[bits(5..=7, rw)]
    dst: Option<SetDst>,
    #[bits(0..=4, rw)]
    data: u5,
}

/// An IRQ index as encoded in WAIT/IRQ: bit 4 is the `rel` flag, bits 3:0
/// are the IRQ number within 0..=7 (bit 3 set is a reserved encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqIndex {
    pub rel: bool,
    pub num: u8,
}

impl IrqIndex {
    fn decode(raw: u5) -> Result<Self, ()> {
        let raw = raw.value();
        let rel = raw & 0x10 != 0;
        let num = raw & 0x0f;
        if num & 0x08 != 0 {
            return Err(());
        }
        Ok(IrqIndex { rel, num })
    }

    fn encode(self) -> u5 {
        let mut raw = self.num & 0x07;
        if self.rel {
            raw |= 0x10;
        }
        u5::new(raw)
    }

    /// Resolve `rel` addressing against the executing SM's own index:
    /// `i|0x10` maps to `(sm_num + i) & 3`.
    pub fn resolve(self, sm_num: u8) -> u8 {
        if self.rel {
            (sm_num + self.num) & 0x03
        } else {
            self.num
        }
    }
}

/// A fully decoded instruction, tagged by opcode, carrying the raw 5-bit
/// delay/side-set field (interpretation depends on the executing SM's
/// `SHIFTCTRL`/`PINCTRL` config, so it is not split here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Jmp { cond: JmpCond, addr: u8 },
    Wait { polarity: bool, src: WaitSrc, index_raw: u8 },
    In { src: InSrc, count: u8 },
    Out { dst: OutDst, count: u8 },
    Push { if_full: bool, block: bool },
    Pull { if_empty: bool, block: bool },
    Mov { dst: MovDst, op: MovOp, src: MovSrc },
    Irq { clear: bool, wait: bool, index_raw: u8 },
    Set { dst: SetDst, data: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub instr: Instruction,
    pub delay_sideset_raw: u8,
}

/// Decode a 16-bit instruction word. Reserved opcode fields or operand
/// encodings produce `DecodeError`, which the SM latches as a fatal stall.
pub fn decode(word: u16, pc: u8) -> Result<Decoded, DecodeError> {
    let raw = RawInstr::new_with_raw_value(word);
    let delay_sideset_raw = raw.delay_sideset().value();
    let err = || DecodeError { word, pc };

    let instr = match raw.opcode() {
        Opcode::Jmp => {
            let p = JmpPayload::new_with_raw_value(raw.payload());
            Instruction::Jmp { cond: p.cond(), addr: p.addr().value() }
        }
        Opcode::Wait => {
            let p = WaitPayload::new_with_raw_value(raw.payload());
            let src = p.src().ok_or_else(err)?;
            let index_raw = p.index().value();
            if src == WaitSrc::Irq && IrqIndex::decode(p.index()).is_err() {
                return Err(err());
            }
            Instruction::Wait { polarity: p.polarity(), src, index_raw }
        }
        Opcode::In => {
            let p = InPayload::new_with_raw_value(raw.payload());
            let src = p.src().ok_or_else(err)?;
            Instruction::In { src, count: p.count().value() }
        }
        Opcode::Out => {
            let p = OutPayload::new_with_raw_value(raw.payload());
            Instruction::Out { dst: p.dst(), count: p.count().value() }
        }
        Opcode::PushPull => {
            let p = PushPullPayload::new_with_raw_value(raw.payload());
            if p.is_pull() {
                Instruction::Pull { if_empty: p.if_full_or_empty(), block: p.block() }
            } else {
                Instruction::Push { if_full: p.if_full_or_empty(), block: p.block() }
            }
        }
        Opcode::Mov => {
            let p = MovPayload::new_with_raw_value(raw.payload());
            let dst = p.dst().ok_or_else(err)?;
            let op = p.op().ok_or_else(err)?;
            let src = p.src().ok_or_else(err)?;
            Instruction::Mov { dst, op, src }
        }
        Opcode::Irq => {
            let p = IrqPayload::new_with_raw_value(raw.payload());
            if p.reserved() {
                return Err(err());
            }
            let index_raw = p.index().value();
            if IrqIndex::decode(p.index()).is_err() {
                return Err(err());
            }
            Instruction::Irq { clear: p.clear(), wait: p.wait(), index_raw }
        }
        Opcode::Set => {
            let p = SetPayload::new_with_raw_value(raw.payload());
            let dst = p.dst().ok_or_else(err)?;
            Instruction::Set { dst, data: p.data().value() }
        }
    };

    Ok(Decoded { instr, delay_sideset_raw })
}

/// Encode a decoded instruction back to its 16-bit word. Exact inverse of
/// [`decode`] for any non-reserved encoding.
pub fn encode(decoded: &Decoded) -> u16 {
    let payload: u8 = match decoded.instr {
        Instruction::Jmp { cond, addr } => {
            JmpPayload::new_with_raw_value(0).with_cond(cond).with_addr(u5::new(addr)).raw_value()
        }
        Instruction::Wait { polarity, src, index_raw } => WaitPayload::new_with_raw_value(0)
            .with_polarity(polarity)
            .with_src(Some(src))
            .with_index(u5::new(index_raw))
            .raw_value(),
        Instruction::In { src, count } => InPayload::new_with_raw_value(0)
            .with_src(Some(src))
            .with_count(u5::new(count))
            .raw_value(),
        Instruction::Out { dst, count } => OutPayload::new_with_raw_value(0)
            .with_dst(dst)
            .with_count(u5::new(count))
            .raw_value(),
        Instruction::Push { if_full, block } => PushPullPayload::new_with_raw_value(0)
            .with_is_pull(false)
            .with_if_full_or_empty(if_full)
            .with_block(block)
            .raw_value(),
        Instruction::Pull { if_empty, block } => PushPullPayload::new_with_raw_value(0)
            .with_is_pull(true)
            .with_if_full_or_empty(if_empty)
            .with_block(block)
            .raw_value(),
        Instruction::Mov { dst, op, src } => MovPayload::new_with_raw_value(0)
            .with_dst(Some(dst))
            .with_op(Some(op))
            .with_src(Some(src))
            .raw_value(),
        Instruction::Irq { clear, wait, index_raw } => IrqPayload::new_with_raw_value(0)
            .with_reserved(false)
            .with_clear(clear)
            .with_wait(wait)
            .with_index(u5::new(index_raw))
            .raw_value(),
        Instruction::Set { dst, data } => SetPayload::new_with_raw_value(0)
            .with_dst(Some(dst))
            .with_data(u5::new(data))
            .raw_value(),
    };

    let opcode = match decoded.instr {
        Instruction::Jmp { .. } => Opcode::Jmp,
        Instruction::Wait { .. } => Opcode::Wait,
        Instruction::In { .. } => Opcode::In,
        Instruction::Out { .. } => Opcode::Out,
        Instruction::Push { .. } | Instruction::Pull { .. } => Opcode::PushPull,
        Instruction::Mov { .. } => Opcode::Mov,
        Instruction::Irq { .. } => Opcode::Irq,
        Instruction::Set { .. } => Opcode::Set,
    };

    RawInstr::new_with_raw_value(0)
        .with_opcode(opcode)
        .with_delay_sideset(u5::new(decoded.delay_sideset_raw))
        .with_payload(payload)
        .raw_value()
}

/// Split the raw 5-bit delay/side-set field according to the executing
/// SM's `side_set_count`/`side_set_enable` config. Returns
/// `(side_set_value, delay)`; `side_set_value` is `None` when side-set is
/// enable-gated and the valid bit is clear.
pub fn split_delay_sideset(raw: u8, side_set_count: u8, side_set_enable: bool) -> (Option<u8>, u8) {
    debug_assert!(side_set_count <= 5);
    let used_bits = side_set_count + side_set_enable as u8;
    let delay_bits = 5 - used_bits;
    let delay_mask = (1u8 << delay_bits) - 1;
    let delay = raw & delay_mask;

    if side_set_count == 0 {
        return (None, delay);
    }

    let side_field = raw >> delay_bits;
    let value_mask = (1u8 << side_set_count) - 1;
    if side_set_enable {
        let valid = (side_field >> side_set_count) & 0x01 != 0;
        let value = side_field & value_mask;
        if valid { (Some(value), delay) } else { (None, delay) }
    } else {
        (Some(side_field & value_mask), delay)
    }
}

/// Human-readable mnemonic for an instruction (disassembly). Matches the
/// textual form [`parse_mnemonic`] reads back, satisfying
/// `assemble(disassemble(w)) == w` for any non-reserved `w`.
pub fn disassemble(decoded: &Decoded) -> String {
    let body = match decoded.instr {
        Instruction::Jmp { cond, addr } => {
            let c = match cond {
                JmpCond::Always => "",
                JmpCond::XIsZero => "!x, ",
                JmpCond::XDec => "x--, ",
                JmpCond::YIsZero => "!y, ",
                JmpCond::YDec => "y--, ",
                JmpCond::XNeY => "x!=y, ",
                JmpCond::Pin => "pin, ",
                JmpCond::OsrNotEmpty => "!osre, ",
            };
            format!("jmp {c}{addr}")
        }
        Instruction::Wait { polarity, src, index_raw } => {
            let src = match src {
                WaitSrc::Gpio => "gpio",
                WaitSrc::Pin => "pin",
                WaitSrc::Irq => "irq",
            };
            format!("wait {} {src} {index_raw}", polarity as u8)
        }
        Instruction::In { src, count } => {
            format!("in {}, {count}", in_src_name(src))
        }
        Instruction::Out { dst, count } => {
            format!("out {}, {count}", out_dst_name(dst))
        }
        Instruction::Push { if_full, block } => {
            format!("push {}{}", if if_full { "iffull " } else { "" }, block_word(block))
        }
        Instruction::Pull { if_empty, block } => {
            format!("pull {}{}", if if_empty { "ifempty " } else { "" }, block_word(block))
        }
        Instruction::Mov { dst, op, src } => {
            format!("mov {}, {}{}", mov_dst_name(dst), mov_op_prefix(op), mov_src_name(src))
        }
        Instruction::Irq { clear, wait, index_raw } => {
            let verb = if clear { "clear" } else { "set" };
            let w = if wait { " wait" } else { "" };
            format!("irq {verb}{w} {index_raw}")
        }
        Instruction::Set { dst, data } => {
            format!("set {}, {data}", set_dst_name(dst))
        }
    };
    format!("{body} d{}", decoded.delay_sideset_raw)
}

fn block_word(block: bool) -> &'static str {
    if block { "block" } else { "noblock" }
}
fn in_src_name(s: InSrc) -> &'static str {
    match s {
        InSrc::Pins => "pins",
        InSrc::X => "x",
        InSrc::Y => "y",
        InSrc::Null => "null",
        InSrc::Isr => "isr",
        InSrc::Osr => "osr",
    }
}
fn out_dst_name(d: OutDst) -> &'static str {
    match d {
        OutDst::Pins => "pins",
        OutDst::X => "x",
        OutDst::Y => "y",
        OutDst::Null => "null",
        OutDst::PinDirs => "pindirs",
        OutDst::Pc => "pc",
        OutDst::Isr => "isr",
        OutDst::Exec => "exec",
    }
}
fn mov_dst_name(d: MovDst) -> &'static str {
    match d {
        MovDst::Pins => "pins",
        MovDst::X => "x",
        MovDst::Y => "y",
        MovDst::Exec => "exec",
        MovDst::Pc => "pc",
        MovDst::Isr => "isr",
        MovDst::Osr => "osr",
    }
}
fn mov_src_name(s: MovSrc) -> &'static str {
    match s {
        MovSrc::Pins => "pins",
        MovSrc::X => "x",
        MovSrc::Y => "y",
        MovSrc::Null => "null",
        MovSrc::Status => "status",
        MovSrc::Isr => "isr",
        MovSrc::Osr => "osr",
    }
}
fn mov_op_prefix(op: MovOp) -> &'static str {
    match op {
        MovOp::None => "",
        MovOp::Invert => "!",
        MovOp::BitReverse => "::",
    }
}
fn set_dst_name(d: SetDst) -> &'static str {
    match d {
        SetDst::Pins => "pins",
        SetDst::X => "x",
        SetDst::Y => "y",
        SetDst::PinDirs => "pindirs",
    }
}

/// Parse the textual form produced by [`disassemble`] back into a
/// [`Decoded`] instruction. Not a general pioasm assembler: it only needs
/// to invert this crate's own canonical disassembly.
pub fn parse_mnemonic(text: &str) -> Option<Decoded> {
    let (body, delay_tok) = text.rsplit_once(" d")?;
    let delay_sideset_raw: u8 = delay_tok.parse().ok()?;
    let mut tokens = body.split_whitespace();
    let mnemonic = tokens.next()?;
    let rest = tokens.collect::<Vec<_>>().join(" ");

    let instr = match mnemonic {
        "jmp" => {
            let (cond_tok, addr_tok) = split_last_comma(&rest);
            let cond = match cond_tok.trim() {
                "" => JmpCond::Always,
                "!x" => JmpCond::XIsZero,
                "x--" => JmpCond::XDec,
                "!y" => JmpCond::YIsZero,
                "y--" => JmpCond::YDec,
                "x!=y" => JmpCond::XNeY,
                "pin" => JmpCond::Pin,
                "!osre" => JmpCond::OsrNotEmpty,
                _ => return None,
            };
            Instruction::Jmp { cond, addr: addr_tok.trim().parse().ok()? }
        }
        "wait" => {
            let mut it = rest.split_whitespace();
            let polarity = it.next()? == "1";
            let src = match it.next()? {
                "gpio" => WaitSrc::Gpio,
                "pin" => WaitSrc::Pin,
                "irq" => WaitSrc::Irq,
                _ => return None,
            };
            let index_raw: u8 = it.next()?.parse().ok()?;
            Instruction::Wait { polarity, src, index_raw }
        }
        "in" => {
            let (src_tok, count_tok) = split_last_comma(&rest);
            let src = parse_in_src(src_tok.trim())?;
            Instruction::In { src, count: count_tok.trim().parse().ok()? }
        }
        "out" => {
            let (dst_tok, count_tok) = split_last_comma(&rest);
            let dst = parse_out_dst(dst_tok.trim())?;
            Instruction::Out { dst, count: count_tok.trim().parse().ok()? }
        }
        "push" => {
            let if_full = rest.contains("iffull");
            let block = !rest.contains("noblock");
            Instruction::Push { if_full, block }
        }
        "pull" => {
            let if_empty = rest.contains("ifempty");
            let block = !rest.contains("noblock");
            Instruction::Pull { if_empty, block }
        }
        "mov" => {
            let (dst_tok, src_tok) = split_last_comma(&rest);
            let dst = parse_mov_dst(dst_tok.trim())?;
            let src_tok = src_tok.trim();
            let (op, src_name) = if let Some(s) = src_tok.strip_prefix("!") {
                (MovOp::Invert, s)
            } else if let Some(s) = src_tok.strip_prefix("::") {
                (MovOp::BitReverse, s)
            } else {
                (MovOp::None, src_tok)
            };
            let src = parse_mov_src(src_name)?;
            Instruction::Mov { dst, op, src }
        }
        "irq" => {
            let mut it = rest.split_whitespace();
            let verb = it.next()?;
            let clear = verb == "clear";
            let mut next = it.next()?;
            let wait = next == "wait";
            if wait {
                next = it.next()?;
            }
            let index_raw: u8 = next.parse().ok()?;
            Instruction::Irq { clear, wait, index_raw }
        }
        "set" => {
            let (dst_tok, data_tok) = split_last_comma(&rest);
            let dst = parse_set_dst(dst_tok.trim())?;
            Instruction::Set { dst, data: data_tok.trim().parse().ok()? }
        }
        _ => return None,
    };

    Some(Decoded { instr, delay_sideset_raw })
}

fn split_last_comma(s: &str) -> (&str, &str) {
    s.rsplit_once(',').unwrap_or((s, ""))
}

fn parse_in_src(s: &str) -> Option<InSrc> {
    Some(match s {
        "pins" => InSrc::Pins,
        "x" => InSrc::X,
        "y" => InSrc::Y,
        "null" => InSrc::Null,
        "isr" => InSrc::Isr,
        "osr" => InSrc::Osr,
        _ => return None,
    })
}
fn parse_out_dst(s: &str) -> Option<OutDst> {
    Some(match s {
        "pins" => OutDst::Pins,
        "x" => OutDst::X,
        "y" => OutDst::Y,
        "null" => OutDst::Null,
        "pindirs" => OutDst::PinDirs,
        "pc" => OutDst::Pc,
        "isr" => OutDst::Isr,
        "exec" => OutDst::Exec,
        _ => return None,
    })
}
fn parse_mov_dst(s: &str) -> Option<MovDst> {
    Some(match s {
        "pins" => MovDst::Pins,
        "x" => MovDst::X,
        "y" => MovDst::Y,
        "exec" => MovDst::Exec,
        "pc" => MovDst::Pc,
        "isr" => MovDst::Isr,
        "osr" => MovDst::Osr,
        _ => return None,
    })
}
fn parse_mov_src(s: &str) -> Option<MovSrc> {
    Some(match s {
        "pins" => MovSrc::Pins,
        "x" => MovSrc::X,
        "y" => MovSrc::Y,
        "null" => MovSrc::Null,
        "status" => MovSrc::Status,
        "isr" => MovSrc::Isr,
        "osr" => MovSrc::Osr,
        _ => return None,
    })
}
fn parse_set_dst(s: &str) -> Option<SetDst> {
    Some(match s {
        "pins" => SetDst::Pins,
        "x" => SetDst::X,
        "y" => SetDst::Y,
        "pindirs" => SetDst::PinDirs,
        _ => return None,
    })
}
