//! Abbreviated one-line text rendering of filter AST nodes.
//!
//! Used by error reporting and trace output; this is not the full
//! s-expression printer, just enough to identify the offending node.

use crate::node::{NodeId, Payload};
use crate::symbol_table::SymbolTable;

/// Depth beyond which children render as `...`.
const MAX_DEPTH: usize = 3;

/// Render `id` as a one-line abbreviated s-expression.
#[must_use]
pub fn abbrev_text(symtab: &SymbolTable, id: NodeId) -> String {
    let mut out = String::new();
    render(symtab, id, 0, &mut out);
    out
}

fn render(symtab: &SymbolTable, id: NodeId, depth: usize, out: &mut String) {
    let node = symtab.node(id);
    match node.payload() {
        Payload::Symbol { name, .. } => {
            out.push('\'');
            out.push_str(name);
            return;
        }
        Payload::Int { value, .. } if node.num_kids() == 0 => {
            out.push('(');
            out.push_str(node.ty().name());
            out.push(' ');
            out.push_str(&value.to_string());
            out.push(')');
            return;
        }
        _ => {}
    }
    out.push('(');
    out.push_str(node.ty().name());
    if depth >= MAX_DEPTH && node.num_kids() > 0 {
        out.push_str(" ...");
    } else {
        for &kid in node.kids() {
            out.push(' ');
            render(symtab, kid, depth + 1, out);
        }
    }
    out.push(')');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_type::NodeType;

    #[test]
    fn renders_literals_and_symbols() {
        let mut symtab = SymbolTable::new();
        let sym = symtab.get_or_create_symbol("code");
        let lit = symtab.create_int(NodeType::U64Const, 42);
        let eval = symtab.create_with_kids(NodeType::Eval, &[sym, lit]);
        assert_eq!(abbrev_text(&symtab, eval), "(eval 'code (u64.const 42))");
    }

    #[test]
    fn truncates_deep_trees() {
        let mut symtab = SymbolTable::new();
        let mut node = symtab.create(NodeType::Void);
        for _ in 0..6 {
            node = symtab.create_with_kids(NodeType::Not, &[node]);
        }
        let text = abbrev_text(&symtab, node);
        assert!(text.contains("..."));
        assert!(text.starts_with("(not"));
    }
}
