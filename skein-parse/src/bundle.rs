//! `Bundle`: a per-module name for a method, owning a compiled message
//! splitter (§3).
//!
//! Compiling message-name *surface syntax* (guillemet groups,
//! optional sections, and the rest of Avail-style message decoration)
//! is out of this core's scope (§1 "defining a concrete grammar" is a
//! non-goal). What §3 does require of a bundle — an ordered
//! instruction sequence with keyword and argument positions — is
//! implemented here for the subset the testable scenarios in §8 need:
//! plain keywords, `_` argument positions, and `…` raw-token
//! positions.

use crate::instruction::ParsingInstruction;
use skein_core::Atom;

/// One element of a bundle's compiled message, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Keyword(String),
    Instruction(ParsingInstruction),
    EndOfMessage,
}

/// A per-module name for a method (§3). `identity` is the atom this
/// bundle's method is known by for prefilter/restriction purposes;
/// several bundles (in different modules, or under different local
/// renames) can share one method.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub identity: Atom,
    pub message_name: String,
    pub compiled: Vec<MessagePart>,
}

impl Bundle {
    pub fn new(identity: Atom, message_name: impl Into<String>) -> Self {
        let message_name = message_name.into();
        let compiled = compile_message(&message_name);
        Self {
            identity,
            message_name,
            compiled,
        }
    }
}

/// Compiles a message name into the ordered `MessagePart` sequence
/// §3's message splitter describes. Splits on whitespace; a bare `_`
/// token becomes an argument position (`save-parse-position`,
/// `parse-argument`, `discard-saved-parse-position` in sequence, so
/// `ensure-parse-progress` checks remain meaningful on argument
/// boundaries), and a bare `…` token becomes a raw-token position.
/// Anything else is a literal keyword.
pub fn compile_message(name: &str) -> Vec<MessagePart> {
    let mut parts = Vec::new();
    for token in name.split_whitespace() {
        match token {
            "_" => {
                parts.push(MessagePart::Instruction(ParsingInstruction::SaveParsePosition));
                parts.push(MessagePart::Instruction(ParsingInstruction::ParseArgument));
                parts.push(MessagePart::Instruction(
                    ParsingInstruction::DiscardSavedParsePosition,
                ));
                parts.push(MessagePart::Instruction(ParsingInstruction::AppendArgument));
            }
            "…" | "..." => {
                parts.push(MessagePart::Instruction(ParsingInstruction::ParseRawToken));
                parts.push(MessagePart::Instruction(ParsingInstruction::AppendArgument));
            }
            keyword => parts.push(MessagePart::Keyword(keyword.to_string())),
        }
    }
    parts.push(MessagePart::EndOfMessage);
    parts
}

/// Number of argument positions (`_`) in a message name; used to size
/// the argument stack before validating a send (§4.D step 1).
pub fn argument_count(name: &str) -> usize {
    name.split_whitespace().filter(|t| *t == "_").count()
}
