//! Threaded dispatch: per-block handler tables.
//!
//! The switch strategy decodes `instr.op` on every step (see [`crate::ops::handler_for`]). The
//! threaded strategy decodes each block once, the first time control reaches it, and then
//! dispatches through the cached table. Both call the same handlers, so they are observably
//! identical.

use viper_il::{BlockId, FunctionId, Module};

use crate::ops::{self, Handler};

pub(crate) struct ThreadedCache {
    /// `tables[func][block]`, filled on first entry.
    tables: Vec<Vec<Option<Box<[Handler]>>>>,
    built: usize,
}

impl ThreadedCache {
    pub(crate) fn new(module: &Module) -> Self {
        let tables = module
            .functions
            .iter()
            .map(|f| f.blocks.iter().map(|_| None).collect())
            .collect();
        Self { tables, built: 0 }
    }

    /// Returns the handler for instruction `ip` of `block`, building the block's table if needed.
    ///
    /// Callers guarantee `ip` indexes an instruction of a block that exists in `module`.
    pub(crate) fn handler(
        &mut self,
        module: &Module,
        func: FunctionId,
        block: BlockId,
        ip: usize,
    ) -> Handler {
        let slot = &mut self.tables[func.0 as usize][block.0];
        let table = slot.get_or_insert_with(|| {
            self.built += 1;
            module.functions[func.0 as usize].blocks[block.0]
                .instructions
                .iter()
                .map(|instr| ops::handler_for(instr.op))
                .collect()
        });
        table[ip]
    }

    /// Number of block tables built so far.
    pub(crate) fn tables_built(&self) -> usize {
        self.built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::{BasicBlock, Function, Instr, Operand, Type};

    #[test]
    fn tables_are_built_once_per_block() {
        let mut module = Module::new("m");
        module
            .add_function(
                Function::new("main", vec![], Type::I64).with_block(
                    BasicBlock::from_instrs("entry", [Instr::ret(Some(Operand::i64(0)))])
                        .unwrap(),
                ),
            )
            .unwrap();

        let mut cache = ThreadedCache::new(&module);
        let first = cache.handler(&module, FunctionId(0), BlockId(0), 0);
        let again = cache.handler(&module, FunctionId(0), BlockId(0), 0);
        assert_eq!(first as usize, again as usize);
        assert_eq!(cache.tables_built(), 1);
    }
}
