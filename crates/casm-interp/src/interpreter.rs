//! The suspendable filter AST interpreter.
//!
//! Evaluation is a recursive walk over the installed AST, but every
//! primitive read and write goes through an explicit frame stack processed
//! by `run_methods`, whose single loop is the only place the machine may
//! suspend: at the top of each iteration it checks the read cursor's
//! headroom, and `read_back_filled` advances the input fill one page at a
//! time until the margin is restored. All transient state lives in the
//! frame, parameter, return, and evaluation stacks, so feeding the input a
//! byte at a time produces the same output as feeding it in one shot.

use casm_ast::{NodeId, NodeType, PredefinedSymbol, SymbolTable};
use casm_error::{CasmError, Result};
use casm_stream::ReadCursor;
use casm_types::limits::DEFAULT_STACK_SIZE;
use casm_types::{
    IntFormat, IntValue, StreamKind, StreamType, CASM_BINARY_MAGIC, CASM_BINARY_VERSION,
    CISM_BINARY_MAGIC, CISM_BINARY_VERSION, WASM_BINARY_MAGIC, WASM_BINARY_VERSION,
};
use tracing::trace;

use crate::writer::InterpWriter;

/// What a frame is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterpMethod {
    Read,
    Write,
}

/// One entry on the interpreter's frame stack.
#[derive(Debug, Clone, Copy)]
struct Frame {
    method: InterpMethod,
    node: NodeId,
}

/// The reader/writer state machine evaluating a filter AST.
pub struct Interpreter<'s, W: InterpWriter> {
    read_pos: ReadCursor,
    writer: W,
    symtab: &'s SymbolTable,
    last_read_value: IntValue,
    cur_section_name: String,
    frame_stack: Vec<Frame>,
    param_stack: Vec<IntValue>,
    return_stack: Vec<IntValue>,
    eval_stack: Vec<NodeId>,
    failed: bool,
    /// Counts evaluated blocks for numbered-block tracing.
    block_count: u64,
}

impl<'s, W: InterpWriter> Interpreter<'s, W> {
    /// New interpreter over `read_pos`, emitting through `writer`.
    pub fn new(read_pos: ReadCursor, writer: W, symtab: &'s SymbolTable) -> Self {
        Self {
            read_pos,
            writer,
            symtab,
            last_read_value: 0,
            cur_section_name: String::new(),
            frame_stack: Vec::with_capacity(DEFAULT_STACK_SIZE),
            param_stack: Vec::with_capacity(DEFAULT_STACK_SIZE),
            return_stack: Vec::with_capacity(DEFAULT_STACK_SIZE),
            eval_stack: Vec::with_capacity(DEFAULT_STACK_SIZE),
            failed: false,
            block_count: 0,
        }
    }

    /// The value of the most recent primitive read.
    #[must_use]
    pub fn last_read_value(&self) -> IntValue {
        self.last_read_value
    }

    /// Give the writer back (to freeze or inspect).
    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Borrow the write backend.
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Cooperative cancellation: clear the frame stack and mark the run
    /// failed; subsequent iterations observe the terminal state.
    pub fn fail(&mut self) {
        self.frame_stack.clear();
        self.failed = true;
    }

    fn kid(&self, node: NodeId, index: usize) -> Result<NodeId> {
        self.symtab.node(node).kid(index).ok_or_else(|| {
            CasmError::internal(format!(
                "{} node missing child {index}",
                self.symtab.ty(node).name()
            ))
        })
    }

    /// Block until the read cursor has its resume margin, pulling input one
    /// page per iteration. A frozen stream always has headroom.
    fn ensure_filled(&mut self) -> Result<()> {
        while !self.read_pos.has_enough_headroom() {
            self.read_pos.fill_page()?;
        }
        Ok(())
    }

    // -- frame machinery ----------------------------------------------------

    /// Run frames above `base` while headroom lasts.
    fn run_methods(&mut self, base: usize) -> Result<()> {
        while self.read_pos.has_enough_headroom() {
            if self.frame_stack.len() <= base {
                return Ok(());
            }
            if self.failed {
                return Err(CasmError::internal("interpreter already failed"));
            }
            let frame = *self
                .frame_stack
                .last()
                .ok_or_else(|| CasmError::internal("empty frame stack"))?;
            match frame.method {
                InterpMethod::Read => {
                    let value = self.read_leaf(frame.node)?;
                    self.frame_stack.pop();
                    self.return_stack.push(value);
                }
                InterpMethod::Write => {
                    let value = *self
                        .param_stack
                        .last()
                        .ok_or_else(|| CasmError::internal("write frame without parameter"))?;
                    self.write_leaf(value, frame.node)?;
                    self.frame_stack.pop();
                    self.param_stack.pop();
                    self.return_stack.push(value);
                }
            }
        }
        Ok(())
    }

    /// Drive `run_methods`, refilling the input between bursts, until the
    /// frame stack drains back to `base`.
    fn read_back_filled(&mut self, base: usize) -> Result<()> {
        while self.frame_stack.len() > base {
            self.ensure_filled()?;
            self.run_methods(base)?;
        }
        Ok(())
    }

    fn call(&mut self, method: InterpMethod, node: NodeId) -> Result<IntValue> {
        let base = self.frame_stack.len();
        self.frame_stack.push(Frame { method, node });
        if let Err(err) = self.read_back_filled(base) {
            self.fail();
            return Err(err);
        }
        self.return_stack
            .pop()
            .ok_or_else(|| CasmError::internal("missing return value"))
    }

    // -- read path ----------------------------------------------------------

    /// Read a value as directed by `node`.
    pub fn read(&mut self, node: NodeId) -> Result<IntValue> {
        let ty = self.symtab.ty(node);
        let value = match ty {
            NodeType::Opcode => self.read_opcode(node, 0, false)?,
            NodeType::Map => self.read_map(node)?,
            NodeType::BinaryEval => {
                let tree = self.kid(node, 0)?;
                self.read_binary(tree)?
            }
            NodeType::Read => {
                let last = self.symtab.node(node).num_kids().saturating_sub(1);
                let kid = self.kid(node, last)?;
                self.read(kid)?
            }
            NodeType::Eval => {
                let body = self.resolve_call_body(node)?;
                self.eval_stack.push(node);
                let value = self.read(body);
                self.eval_stack.pop();
                value?
            }
            NodeType::Param => {
                let resolved = self.get_param(node)?;
                self.read(resolved)?
            }
            NodeType::LastRead => return self.call(InterpMethod::Read, node),
            _ => self.call(InterpMethod::Read, node)?,
        };
        if ty != NodeType::LastRead {
            self.last_read_value = value;
        }
        Ok(value)
    }

    /// Leaf read dispatch, one bounded burst per call.
    fn read_leaf(&mut self, node: NodeId) -> Result<IntValue> {
        let n = self.symtab.node(node);
        let bits = n.value().unwrap_or(0) as u32;
        let value = match n.ty() {
            NodeType::I32Const
            | NodeType::I64Const
            | NodeType::U8Const
            | NodeType::U32Const
            | NodeType::U64Const => n.value().unwrap_or(0),
            NodeType::LastRead => self.last_read_value,
            NodeType::Void => 0,
            NodeType::Peek => {
                self.read_pos.push_peek_pos();
                let kid = self.kid(node, 0)?;
                let value = self.read(kid)?;
                self.read_pos.pop_peek_pos();
                value
            }
            NodeType::Uint8NoArgs => IntValue::from(self.read_pos.read_u8()),
            NodeType::Uint8OneArg | NodeType::Uint32OneArg | NodeType::Uint64OneArg => {
                self.read_pos.read_bits(bits)
            }
            NodeType::Uint32NoArgs => IntValue::from(self.read_pos.read_uint32()),
            NodeType::Uint64NoArgs => self.read_pos.read_uint64(),
            NodeType::Varint32NoArgs | NodeType::Varint32OneArg => {
                self.read_pos.read_varint32()? as i64 as IntValue
            }
            NodeType::Varint64NoArgs | NodeType::Varint64OneArg => {
                self.read_pos.read_varint64()? as IntValue
            }
            NodeType::Varuint32NoArgs | NodeType::Varuint32OneArg => {
                IntValue::from(self.read_pos.read_varuint32()?)
            }
            NodeType::Varuint64NoArgs | NodeType::Varuint64OneArg => {
                self.read_pos.read_varuint64()?
            }
            other => {
                return Err(CasmError::CannotEvaluate { name: other.name() });
            }
        };
        Ok(value)
    }

    // -- write path ---------------------------------------------------------

    /// Write `value` as directed by `node`.
    pub fn write(&mut self, value: IntValue, node: NodeId) -> Result<IntValue> {
        match self.symtab.ty(node) {
            NodeType::Opcode => self.write_opcode(value, node),
            NodeType::BinaryEval => {
                let tree = self.kid(node, 0)?;
                self.write_binary(value, tree)?;
                Ok(value)
            }
            _ => {
                self.param_stack.push(value);
                let returned = self.call(InterpMethod::Write, node)?;
                Ok(returned)
            }
        }
    }

    /// Leaf write dispatch.
    fn write_leaf(&mut self, value: IntValue, node: NodeId) -> Result<()> {
        let n = self.symtab.node(node);
        let bits = n.value().unwrap_or(0) as u32;
        match n.ty() {
            NodeType::Uint8NoArgs => self.writer.write_value(value, IntFormat::Uint8)?,
            NodeType::Uint32NoArgs => self.writer.write_value(value, IntFormat::Uint32)?,
            NodeType::Uint64NoArgs => self.writer.write_value(value, IntFormat::Uint64)?,
            NodeType::Varint32NoArgs | NodeType::Varint32OneArg => {
                self.writer.write_value(value, IntFormat::Varint32)?;
            }
            NodeType::Varint64NoArgs | NodeType::Varint64OneArg => {
                self.writer.write_value(value, IntFormat::Varint64)?;
            }
            NodeType::Varuint32NoArgs | NodeType::Varuint32OneArg => {
                self.writer.write_value(value, IntFormat::Varuint32)?;
            }
            NodeType::Varuint64NoArgs | NodeType::Varuint64OneArg => {
                self.writer.write_value(value, IntFormat::Varuint64)?;
            }
            NodeType::Uint8OneArg | NodeType::Uint32OneArg | NodeType::Uint64OneArg => {
                self.writer.write_bits(value, bits)?;
            }
            NodeType::Param => {
                let resolved = self.get_param(node)?;
                self.write_leaf(value, resolved)?;
            }
            // Pass-through writes: the value is already where it belongs.
            NodeType::I32Const
            | NodeType::I64Const
            | NodeType::U8Const
            | NodeType::U32Const
            | NodeType::U64Const
            | NodeType::Map
            | NodeType::Peek
            | NodeType::LastRead
            | NodeType::Void => {}
            other => {
                return Err(CasmError::CannotEvaluate { name: other.name() });
            }
        }
        Ok(())
    }

    // -- parameters and calls -----------------------------------------------

    /// Resolve a `Param` reference against the evaluation stack: the
    /// nearest enclosing `Eval` whose callee matches the parameter's
    /// defining symbol supplies argument `index + 1`.
    fn get_param(&self, node: NodeId) -> Result<NodeId> {
        let index = self.symtab.node(node).value().unwrap_or(0);
        let defining = self.symtab.param_defining_sym(node);
        for &caller in self.eval_stack.iter().rev() {
            let callee = self.symtab.node(caller).kid(0);
            if defining.is_some() && callee != defining {
                continue;
            }
            let arg_index = usize::try_from(index + 1)
                .map_err(|_| CasmError::UnboundParameter { index })?;
            if let Some(arg) = self.symtab.node(caller).kid(arg_index) {
                return Ok(arg);
            }
        }
        Err(CasmError::UnboundParameter { index })
    }

    /// Resolve an `Eval` node to its define body, checking arity.
    fn resolve_call_body(&mut self, node: NodeId) -> Result<NodeId> {
        let sym = self.kid(node, 0)?;
        let name = self.symtab.symbol_name(sym).unwrap_or("").to_owned();
        let define = self
            .symtab
            .symbol_define(sym)
            .ok_or_else(|| CasmError::undefined(&name))?;
        let expected = self.symtab.define_param_count(define)?;
        let actual = (self.symtab.node(node).num_kids() - 1) as u64;
        if expected != actual {
            return Err(CasmError::ArityMismatch {
                symbol: name,
                expected,
                actual,
            });
        }
        self.symtab
            .define_body(define)
            .ok_or_else(|| CasmError::undefined(&name))
    }

    // -- opcode selectors ---------------------------------------------------

    /// Read a selector value and its bit width.
    fn read_opcode_selector(&mut self, node: NodeId) -> Result<(IntValue, u32)> {
        let n = self.symtab.node(node);
        match n.ty() {
            NodeType::Uint8NoArgs => Ok((self.read(node)?, 8)),
            NodeType::Uint32NoArgs => Ok((self.read(node)?, 32)),
            NodeType::Uint64NoArgs => Ok((self.read(node)?, 64)),
            NodeType::Uint8OneArg | NodeType::Uint32OneArg | NodeType::Uint64OneArg => {
                let width = n.value().unwrap_or(0) as u32;
                Ok((self.read(node)?, width))
            }
            NodeType::Eval => {
                let body = self.resolve_call_body(node)?;
                self.eval_stack.push(node);
                let result = self.read_opcode_selector(body);
                self.eval_stack.pop();
                result
            }
            _ => Ok((self.read(node)?, 0)),
        }
    }

    /// Static bit width of a selector, for the write-side inverse.
    fn static_selector_width(&self, node: NodeId) -> Option<u32> {
        let n = self.symtab.node(node);
        match n.ty() {
            NodeType::Uint8NoArgs => Some(8),
            NodeType::Uint32NoArgs => Some(32),
            NodeType::Uint64NoArgs => Some(64),
            NodeType::Uint8OneArg | NodeType::Uint32OneArg | NodeType::Uint64OneArg => {
                n.value().map(|v| v as u32)
            }
            NodeType::Eval => {
                let sym = n.kid(0)?;
                let define = self.symtab.symbol_define(sym)?;
                let body = self.symtab.define_body(define)?;
                self.static_selector_width(body)
            }
            _ => None,
        }
    }

    /// Read a multi-level opcode: `value = (prefix << width) | raw` when
    /// nested, then the matching case is entered by exact value.
    fn read_opcode(&mut self, node: NodeId, prefix: IntValue, nested: bool) -> Result<IntValue> {
        let selector = self.kid(node, 0)?;
        let (raw, width) = self.read_opcode_selector(selector)?;
        let mut value = raw;
        if nested {
            if !(1..64).contains(&width) {
                return Err(CasmError::internal(
                    "opcode selector has illegal bit width",
                ));
            }
            value |= prefix << width;
        }
        self.last_read_value = value;
        if let Some(case) = self.symtab.find_case(node, 1, value) {
            let body = self.kid(case, 1)?;
            value = if self.symtab.ty(body) == NodeType::Opcode {
                self.read_opcode(body, value, true)?
            } else {
                self.eval(case)?
            };
        }
        Ok(value)
    }

    /// Write-side inverse: successive cases identify a shift and mask so
    /// high-order bits route to the outer selector and low-order bits to
    /// the nested case body.
    fn write_opcode(&mut self, value: IntValue, node: NodeId) -> Result<IntValue> {
        let selector = self.kid(node, 0)?;
        // Exact terminal case: the whole value rides the selector.
        if let Some(case) = self.symtab.find_case(node, 1, value) {
            let body = self.kid(case, 1)?;
            if self.symtab.ty(body) != NodeType::Opcode {
                self.write(value, selector)?;
                return Ok(value);
            }
        }
        // Prefixed case: the nested opcode's selector carries the low bits.
        for &case in &self.symtab.node(node).kids()[1..] {
            if self.symtab.ty(case) != NodeType::Case {
                continue;
            }
            let value_node = self.kid(case, 0)?;
            let case_value = self.symtab.node(value_node).value().unwrap_or(0);
            let body = self.kid(case, 1)?;
            if self.symtab.ty(body) != NodeType::Opcode {
                continue;
            }
            let inner_selector = self.kid(body, 0)?;
            if let Some(width) = self.static_selector_width(inner_selector) {
                if (1..64).contains(&width) && value >> width == case_value {
                    self.write(value >> width, selector)?;
                    let mask = (1u64 << width) - 1;
                    self.write_opcode(value & mask, body)?;
                    return Ok(value);
                }
            }
        }
        // No case: raw selector write.
        self.write(value, selector)?;
        Ok(value)
    }

    /// Map a selector value through a `Map` node's case table.
    fn read_map(&mut self, node: NodeId) -> Result<IntValue> {
        let kid = self.kid(node, 0)?;
        let selector = self.read(kid)?;
        match self.symtab.find_case(node, 1, selector) {
            Some(case) => {
                let target = self.kid(case, 1)?;
                self.read(target)
            }
            None => Ok(selector),
        }
    }

    /// Decode one prefix-code symbol: one bit per level, accepting at a
    /// leaf.
    fn read_binary(&mut self, mut node: NodeId) -> Result<IntValue> {
        loop {
            match self.symtab.ty(node) {
                NodeType::BinarySelect => {
                    let bit = self.read_pos.read_bit();
                    node = self.kid(node, usize::from(bit))?;
                }
                NodeType::BinaryAccept => {
                    return Ok(self.symtab.node(node).value().unwrap_or(0));
                }
                other => return Err(CasmError::CannotEvaluate { name: other.name() }),
            }
        }
    }

    /// Encode one prefix-code symbol: emit the path bits to the leaf
    /// accepting `value`.
    fn write_binary(&mut self, value: IntValue, node: NodeId) -> Result<()> {
        let mut path = Vec::new();
        if !self.find_binary_path(value, node, &mut path) {
            return Err(CasmError::NoSuchCase { selector: value });
        }
        for bit in path {
            self.writer.write_bits(IntValue::from(bit), 1)?;
        }
        Ok(())
    }

    fn find_binary_path(&self, value: IntValue, node: NodeId, path: &mut Vec<u8>) -> bool {
        match self.symtab.ty(node) {
            NodeType::BinaryAccept => self.symtab.node(node).value() == Some(value),
            NodeType::BinarySelect => {
                for bit in 0..2u8 {
                    let Some(kid) = self.symtab.node(node).kid(usize::from(bit)) else {
                        continue;
                    };
                    path.push(bit);
                    if self.find_binary_path(value, kid, path) {
                        return true;
                    }
                    path.pop();
                }
                false
            }
            _ => false,
        }
    }

    // -- evaluation ---------------------------------------------------------

    /// Evaluate a filter AST node.
    #[allow(clippy::too_many_lines)]
    pub fn eval(&mut self, node: NodeId) -> Result<IntValue> {
        if self.failed {
            return Err(CasmError::internal("interpreter already failed"));
        }
        let ty = self.symtab.ty(node);
        let mut return_value: IntValue = 0;
        match ty {
            // Not evaluable at all.
            NodeType::Convert
            | NodeType::Filter
            | NodeType::Symbol
            | NodeType::File
            | NodeType::Section
            | NodeType::Undefine
            | NodeType::Rename
            | NodeType::UnknownSection
            | NodeType::FileHeader
            | NodeType::ReadHeader
            | NodeType::WriteHeader
            | NodeType::EnclosingAlgorithms
            | NodeType::LiteralDef
            | NodeType::BinarySelect
            | NodeType::BinaryAccept
            | NodeType::NoParams
            | NodeType::NoLocals
            | NodeType::ParamValues => {
                return Err(CasmError::CannotEvaluate { name: ty.name() });
            }
            NodeType::Param => {
                let resolved = self.get_param(node)?;
                return_value = self.eval(resolved)?;
            }
            NodeType::Define => {
                let body = self
                    .symtab
                    .define_body(node)
                    .ok_or_else(|| CasmError::internal("define without body"))?;
                return_value = self.eval(body)?;
            }
            NodeType::Map | NodeType::Opcode => {
                let value = self.read(node)?;
                return_value = self.write(value, node)?;
            }
            NodeType::LastRead => {
                return_value = self.read(node)?;
            }
            NodeType::Switch => {
                let selector_node = self.kid(node, 0)?;
                let selector = self.eval(selector_node)?;
                match self.symtab.find_case(node, 2, selector) {
                    Some(case) => {
                        return_value = self.eval(case)?;
                    }
                    None => {
                        let default = self.kid(node, 1)?;
                        return_value = self.eval(default)?;
                    }
                }
            }
            NodeType::Case => {
                return_value = {
                    let action = self.kid(node, 1)?;
                    self.eval(action)?
                };
            }
            NodeType::Block => {
                trace!("block {}", self.block_count);
                self.block_count += 1;
                let code = self.kid(node, 0)?;
                self.decompress_block(Some(code))?;
            }
            NodeType::And => {
                let lhs = self.kid(node, 0)?;
                let rhs = self.kid(node, 1)?;
                if self.eval(lhs)? != 0 && self.eval(rhs)? != 0 {
                    return_value = 1;
                }
            }
            NodeType::Or => {
                let lhs = self.kid(node, 0)?;
                let rhs = self.kid(node, 1)?;
                if self.eval(lhs)? != 0 || self.eval(rhs)? != 0 {
                    return_value = 1;
                }
            }
            NodeType::Not => {
                let kid = self.kid(node, 0)?;
                if self.eval(kid)? == 0 {
                    return_value = 1;
                }
            }
            NodeType::BitwiseAnd => {
                let lhs = self.kid(node, 0)?;
                let rhs = self.kid(node, 1)?;
                return_value = self.eval(lhs)? & self.eval(rhs)?;
            }
            NodeType::BitwiseOr => {
                let lhs = self.kid(node, 0)?;
                let rhs = self.kid(node, 1)?;
                return_value = self.eval(lhs)? | self.eval(rhs)?;
            }
            NodeType::BitwiseXor => {
                let lhs = self.kid(node, 0)?;
                let rhs = self.kid(node, 1)?;
                return_value = self.eval(lhs)? ^ self.eval(rhs)?;
            }
            NodeType::BitwiseNegate => {
                let kid = self.kid(node, 0)?;
                return_value = !self.eval(kid)?;
            }
            NodeType::LastSymbolIs => {
                let sym = self.kid(node, 0)?;
                let name = self.symtab.symbol_name(sym).unwrap_or("");
                if name == self.cur_section_name {
                    return_value = 1;
                }
            }
            NodeType::Stream => {
                let casm_ast::Payload::Stream { kind, ty: stream_ty } =
                    *self.symtab.node(node).payload()
                else {
                    return Err(CasmError::internal("stream node without payload"));
                };
                let actual = match kind {
                    StreamKind::Input => StreamType::Byte,
                    StreamKind::Output => self.writer.stream_type(),
                };
                if actual == stream_ty {
                    return_value = 1;
                }
            }
            NodeType::Error => {
                self.fail();
                return Err(CasmError::FilterError);
            }
            NodeType::Eval => {
                let body = self.resolve_call_body(node)?;
                self.eval_stack.push(node);
                let result = self.eval(body);
                self.eval_stack.pop();
                return_value = result?;
            }
            NodeType::IfThen => {
                let cond = self.kid(node, 0)?;
                if self.eval(cond)? != 0 {
                    let then = self.kid(node, 1)?;
                    self.eval(then)?;
                }
            }
            NodeType::IfThenElse => {
                let cond = self.kid(node, 0)?;
                let target = if self.eval(cond)? != 0 {
                    self.kid(node, 1)?
                } else {
                    self.kid(node, 2)?
                };
                self.eval(target)?;
            }
            NodeType::I32Const
            | NodeType::I64Const
            | NodeType::U8Const
            | NodeType::U32Const
            | NodeType::U64Const => {
                return_value = self.read(node)?;
            }
            NodeType::Loop => {
                let count_node = self.kid(node, 0)?;
                let count = self.eval(count_node)?;
                let kids = self.symtab.node(node).kids()[1..].to_vec();
                for _ in 0..count {
                    for &kid in &kids {
                        self.eval(kid)?;
                    }
                }
            }
            NodeType::LoopUnbounded => {
                let kids = self.symtab.node(node).kids().to_vec();
                loop {
                    self.ensure_filled()?;
                    if self.read_pos.at_read_bit_eob() || self.failed {
                        break;
                    }
                    for &kid in &kids {
                        self.eval(kid)?;
                    }
                }
            }
            NodeType::Write => {
                let format = self.kid(node, 0)?;
                let sources = self.symtab.node(node).kids()[1..].to_vec();
                for kid in sources {
                    let value = self.read(kid)?;
                    return_value = self.write(value, format)?;
                }
            }
            NodeType::Peek => {
                return_value = self.read(node)?;
            }
            NodeType::Read => {
                return_value = self.read(node)?;
            }
            NodeType::Sequence => {
                let kids = self.symtab.node(node).kids().to_vec();
                for kid in kids {
                    return_value = self.eval(kid)?;
                }
            }
            NodeType::Callback => {
                let action = self.callback_symbol(node)?;
                if action == PredefinedSymbol::Align {
                    self.read_pos.align_to_byte();
                }
                self.writer.write_action(action)?;
            }
            NodeType::LiteralUse => {
                let action = self.callback_symbol(node)?;
                if action == PredefinedSymbol::Align {
                    self.read_pos.align_to_byte();
                }
                self.writer.write_action(action)?;
            }
            NodeType::BinaryEval => {
                return_value = self.read(node)?;
            }
            NodeType::Uint8NoArgs
            | NodeType::Uint8OneArg
            | NodeType::Uint32NoArgs
            | NodeType::Uint32OneArg
            | NodeType::Uint64NoArgs
            | NodeType::Uint64OneArg
            | NodeType::Varint32NoArgs
            | NodeType::Varint32OneArg
            | NodeType::Varint64NoArgs
            | NodeType::Varint64OneArg
            | NodeType::Varuint32NoArgs
            | NodeType::Varuint32OneArg
            | NodeType::Varuint64NoArgs
            | NodeType::Varuint64OneArg => {
                let value = self.read(node)?;
                return_value = self.write(value, node)?;
            }
            NodeType::Void => {}
        }
        Ok(return_value)
    }

    /// Resolve a `Callback`/`LiteralUse` chain down to its predefined
    /// symbol.
    fn callback_symbol(&self, node: NodeId) -> Result<PredefinedSymbol> {
        let mut cur = node;
        loop {
            match self.symtab.ty(cur) {
                NodeType::Callback | NodeType::LiteralUse => {
                    cur = self
                        .symtab
                        .node(cur)
                        .kid(0)
                        .ok_or_else(|| CasmError::internal("callback without target"))?;
                }
                NodeType::Symbol => {
                    return self.symtab.symbol_predefined(cur).ok_or_else(|| {
                        CasmError::undefined(self.symtab.symbol_name(cur).unwrap_or(""))
                    });
                }
                other => return Err(CasmError::CannotEvaluate { name: other.name() }),
            }
        }
    }

    // -- module-level driving -----------------------------------------------

    /// Decompress one size-prefixed block, evaluating `code` against its
    /// contents (or copying the payload byte for byte when `code` is
    /// `None`), and backpatch the emitted size.
    pub fn decompress_block(&mut self, code: Option<NodeId>) -> Result<()> {
        self.ensure_filled()?;
        let old_size = self.read_pos.read_block_size()?;
        trace!("block size {}", old_size);
        self.read_pos.push_eob_address(old_size)?;
        let mark = self.writer.begin_block()?;
        self.eval_or_copy(code)?;
        self.writer.end_block(mark)?;
        self.read_pos.pop_eob_address();
        Ok(())
    }

    fn eval_or_copy(&mut self, code: Option<NodeId>) -> Result<()> {
        match code {
            Some(node) => {
                self.eval(node)?;
                Ok(())
            }
            None => {
                // Not defined: copy the octet-aligned tail of the section.
                loop {
                    self.ensure_filled()?;
                    if self.read_pos.at_byte_eob() {
                        return Ok(());
                    }
                    let byte = self.read_pos.read_u8();
                    self.writer
                        .write_value(IntValue::from(byte), IntFormat::Uint8)?;
                }
            }
        }
    }

    /// Decompress one named section: mirror the name, look up its symbol,
    /// and run the symbol's define over the section block.
    pub fn decompress_section(&mut self) -> Result<()> {
        self.last_read_value = 0;
        self.ensure_filled()?;
        let name_size = self.read_pos.read_varuint32()?;
        self.writer
            .write_value(IntValue::from(name_size), IntFormat::Varuint32)?;
        self.cur_section_name.clear();
        for _ in 0..name_size {
            self.ensure_filled()?;
            let byte = self.read_pos.read_u8();
            if self.read_pos.hit_eof() {
                return Err(CasmError::TruncatedName {
                    expected: name_size as usize,
                    actual: self.cur_section_name.len(),
                });
            }
            self.writer
                .write_value(IntValue::from(byte), IntFormat::Uint8)?;
            self.cur_section_name.push(byte as char);
        }
        trace!("section '{}'", self.cur_section_name);
        let define = self
            .symtab
            .get_symbol(&self.cur_section_name)
            .and_then(|sym| self.symtab.symbol_define(sym));
        self.decompress_block(define)?;
        self.read_pos.align_to_byte();
        self.writer.align_to_byte()?;
        Ok(())
    }

    /// Top-level driver: mirror the magic and version, decompress sections
    /// until end of input, and freeze the output.
    pub fn decompress(&mut self) -> Result<()> {
        self.last_read_value = 0;
        self.ensure_filled()?;
        let magic = self.read_pos.read_uint32();
        let expected_version = match magic {
            WASM_BINARY_MAGIC => WASM_BINARY_VERSION,
            CASM_BINARY_MAGIC => CASM_BINARY_VERSION,
            CISM_BINARY_MAGIC => CISM_BINARY_VERSION,
            found => {
                return Err(CasmError::BadMagic {
                    found,
                    expected: WASM_BINARY_MAGIC,
                });
            }
        };
        self.writer
            .write_value(IntValue::from(magic), IntFormat::Uint32)?;
        let version = self.read_pos.read_uint32();
        if version != expected_version {
            return Err(CasmError::BadVersion { found: version });
        }
        self.writer
            .write_value(IntValue::from(version), IntFormat::Uint32)?;
        loop {
            self.ensure_filled()?;
            if self.read_pos.at_byte_eob() {
                break;
            }
            self.decompress_section()?;
        }
        self.writer.freeze()?;
        Ok(())
    }
}
