//! Typed parsing instructions (§4.C, §9 "Dynamic parsing
//! instructions").
//!
//! The instruction set is bit-packed on disk/wire (an opcode byte plus
//! an optional operand), but the parser and bundle tree never touch
//! that encoding directly: `decode` is called once at `expand` time
//! and everything downstream works with this enum.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("reserved parsing instruction opcode {0} encountered; this is an internal error")]
    Reserved(u8),
    #[error("unknown parsing instruction opcode {0}")]
    Unknown(u8),
}

const OP_PARSE_ARGUMENT: u8 = 0;
const OP_NEW_LIST: u8 = 1;
const OP_APPEND_ARGUMENT: u8 = 2;
const OP_SAVE_PARSE_POSITION: u8 = 3;
const OP_DISCARD_SAVED_PARSE_POSITION: u8 = 4;
const OP_ENSURE_PARSE_PROGRESS: u8 = 5;
const OP_PARSE_RAW_TOKEN: u8 = 6;
const OP_PARSE_ARGUMENT_IN_MODULE_SCOPE: u8 = 7;
const OP_PUSH_TRUE: u8 = 8;
const OP_PUSH_FALSE: u8 = 9;
// 10..=15 are reserved; the original source merely asserted on them.
const OP_PUSH_INTEGER_LITERAL: u8 = 16;
const OP_JUMP: u8 = 17;
const OP_BRANCH: u8 = 18;
const OP_CHECK_ARGUMENT: u8 = 19;
const OP_CONVERT: u8 = 20;
const OP_PERMUTE: u8 = 21;
const OP_PREPARE_TO_RUN_PREFIX: u8 = 22;
const OP_RUN_PREFIX: u8 = 23;

/// A conversion rule applied by `convert(rule)` (§4.C). The concrete
/// set of rules is external-grammar territory (§1 non-goals); only the
/// two rules the testable scenarios exercise are named here, plus a
/// catch-all for anything else a bundle's message splitter emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionRule {
    TupleOfCharactersToString,
    ListToTuple,
    Other(u16),
}

impl ConversionRule {
    fn encode(self) -> u16 {
        match self {
            Self::TupleOfCharactersToString => 0,
            Self::ListToTuple => 1,
            Self::Other(n) => n,
        }
    }

    fn decode(value: u16) -> Self {
        match value {
            0 => Self::TupleOfCharactersToString,
            1 => Self::ListToTuple,
            n => Self::Other(n),
        }
    }
}

/// One parsing instruction, decoded from its wire opcode+operand once
/// at `expand` time (§9).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParsingInstruction {
    ParseArgument,
    NewList,
    AppendArgument,
    SaveParsePosition,
    DiscardSavedParsePosition,
    EnsureParseProgress,
    ParseRawToken,
    ParseArgumentInModuleScope,
    PushTrue,
    PushFalse,
    PushIntegerLiteral(i64),
    /// Target is an index into the owning bundle's compiled sequence.
    Jump(u32),
    /// Targets are indices into the owning bundle's compiled sequence;
    /// more than one target means the parser must fork.
    Branch(Vec<u32>),
    CheckArgument,
    Convert(ConversionRule),
    /// One-based permutation, as delivered to `PhraseKind::PermutedList`.
    Permute(Vec<u32>),
    PrepareToRunPrefix(u32),
    RunPrefix(u32),
}

impl ParsingInstruction {
    /// Decodes a wire-format opcode/operand pair. `operand` is
    /// interpreted only by instructions that need one; all others
    /// ignore it.
    pub fn decode(opcode: u8, operand: i64) -> Result<Self, DecodeError> {
        match opcode {
            OP_PARSE_ARGUMENT => Ok(Self::ParseArgument),
            OP_NEW_LIST => Ok(Self::NewList),
            OP_APPEND_ARGUMENT => Ok(Self::AppendArgument),
            OP_SAVE_PARSE_POSITION => Ok(Self::SaveParsePosition),
            OP_DISCARD_SAVED_PARSE_POSITION => Ok(Self::DiscardSavedParsePosition),
            OP_ENSURE_PARSE_PROGRESS => Ok(Self::EnsureParseProgress),
            OP_PARSE_RAW_TOKEN => Ok(Self::ParseRawToken),
            OP_PARSE_ARGUMENT_IN_MODULE_SCOPE => Ok(Self::ParseArgumentInModuleScope),
            OP_PUSH_TRUE => Ok(Self::PushTrue),
            OP_PUSH_FALSE => Ok(Self::PushFalse),
            10..=15 => Err(DecodeError::Reserved(opcode)),
            OP_PUSH_INTEGER_LITERAL => Ok(Self::PushIntegerLiteral(operand)),
            OP_JUMP => Ok(Self::Jump(operand as u32)),
            OP_BRANCH => Ok(Self::Branch(vec![operand as u32])),
            OP_CHECK_ARGUMENT => Ok(Self::CheckArgument),
            OP_CONVERT => Ok(Self::Convert(ConversionRule::decode(operand as u16))),
            OP_PERMUTE => Ok(Self::Permute(vec![operand as u32])),
            OP_PREPARE_TO_RUN_PREFIX => Ok(Self::PrepareToRunPrefix(operand as u32)),
            OP_RUN_PREFIX => Ok(Self::RunPrefix(operand as u32)),
            other => Err(DecodeError::Unknown(other)),
        }
    }

    /// Encodes back to a wire opcode/operand pair. `Branch`/`Permute`
    /// carry more than one `u32` in memory but the wire operand is a
    /// single `i64`; only the first target round-trips, which is all
    /// `validate` below needs since it only checks opcode validity.
    pub fn encode(&self) -> (u8, i64) {
        match self {
            Self::ParseArgument => (OP_PARSE_ARGUMENT, 0),
            Self::NewList => (OP_NEW_LIST, 0),
            Self::AppendArgument => (OP_APPEND_ARGUMENT, 0),
            Self::SaveParsePosition => (OP_SAVE_PARSE_POSITION, 0),
            Self::DiscardSavedParsePosition => (OP_DISCARD_SAVED_PARSE_POSITION, 0),
            Self::EnsureParseProgress => (OP_ENSURE_PARSE_PROGRESS, 0),
            Self::ParseRawToken => (OP_PARSE_RAW_TOKEN, 0),
            Self::ParseArgumentInModuleScope => (OP_PARSE_ARGUMENT_IN_MODULE_SCOPE, 0),
            Self::PushTrue => (OP_PUSH_TRUE, 0),
            Self::PushFalse => (OP_PUSH_FALSE, 0),
            Self::PushIntegerLiteral(v) => (OP_PUSH_INTEGER_LITERAL, *v),
            Self::Jump(t) => (OP_JUMP, *t as i64),
            Self::Branch(targets) => (OP_BRANCH, targets.first().copied().unwrap_or(0) as i64),
            Self::CheckArgument => (OP_CHECK_ARGUMENT, 0),
            Self::Convert(rule) => (OP_CONVERT, rule.encode() as i64),
            Self::Permute(perm) => (OP_PERMUTE, perm.first().copied().unwrap_or(0) as i64),
            Self::PrepareToRunPrefix(t) => (OP_PREPARE_TO_RUN_PREFIX, *t as i64),
            Self::RunPrefix(t) => (OP_RUN_PREFIX, *t as i64),
        }
    }

    /// Validates this instruction's own opcode by round-tripping it
    /// through `decode` (§9 Open Question 2): a `RESERVED_10..15` or
    /// unrecognized opcode reaching the bundle tree is an internal
    /// error, never a value to mis-parse around.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let (opcode, operand) = self.encode();
        ParsingInstruction::decode(opcode, operand).map(|_| ())
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Self::ParseArgument => OP_PARSE_ARGUMENT,
            Self::NewList => OP_NEW_LIST,
            Self::AppendArgument => OP_APPEND_ARGUMENT,
            Self::SaveParsePosition => OP_SAVE_PARSE_POSITION,
            Self::DiscardSavedParsePosition => OP_DISCARD_SAVED_PARSE_POSITION,
            Self::EnsureParseProgress => OP_ENSURE_PARSE_PROGRESS,
            Self::ParseRawToken => OP_PARSE_RAW_TOKEN,
            Self::ParseArgumentInModuleScope => OP_PARSE_ARGUMENT_IN_MODULE_SCOPE,
            Self::PushTrue => OP_PUSH_TRUE,
            Self::PushFalse => OP_PUSH_FALSE,
            Self::PushIntegerLiteral(_) => OP_PUSH_INTEGER_LITERAL,
            Self::Jump(_) => OP_JUMP,
            Self::Branch(_) => OP_BRANCH,
            Self::CheckArgument => OP_CHECK_ARGUMENT,
            Self::Convert(_) => OP_CONVERT,
            Self::Permute(_) => OP_PERMUTE,
            Self::PrepareToRunPrefix(_) => OP_PREPARE_TO_RUN_PREFIX,
            Self::RunPrefix(_) => OP_RUN_PREFIX,
        }
    }

    /// Whether two instructions share the same "encoded action" for
    /// bundle-tree grouping purposes (§4.B step 4): same opcode and,
    /// for operand-bearing instructions, same operand. `Branch`
    /// deliberately compares only by opcode, since distinct bundles
    /// reaching a branch at the same node share one action group that
    /// then forks to the union of all their targets.
    pub fn shares_action_group_with(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Branch(_), Self::Branch(_)) => true,
            _ => self == other,
        }
    }
}
