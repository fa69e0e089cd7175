//! Built-in block types, state blocks and field functions.

macro_rules! define_block {
    (
        $struct_name:ident,
        type_name: $type_name:expr,
        inputs: [$($input:expr),* $(,)?]
    ) => {
        pub struct $struct_name;

        impl $struct_name {
            pub fn new() -> Self {
                Self
            }
        }

        impl $crate::core::compiler::BlockLowering for $struct_name {
            fn type_name(&self) -> &'static str {
                $type_name
            }

            fn input_ports(&self) -> &'static [&'static str] {
                &[$($input),*]
            }

            fn lower(
                &self,
                ctx: &$crate::core::compiler::LoweringContext,
                inputs: &$crate::core::compiler::ResolvedInputs,
                config: &serde_json::Value,
            ) -> Result<$crate::core::compiler::LoweredBlock, $crate::error::LibraryError> {
                self.lower_block(ctx, inputs, config)
            }
        }
    };
}
pub(crate) use define_block;

pub mod domains;
pub mod fields;
pub mod functions;
pub mod render;
pub mod signals;
pub mod state_blocks;

use std::sync::Arc;

use log::debug;

use crate::core::compiler::Registries;

pub use domains::{DomainCountBlock, DomainGridBlock};
pub use fields::{
    FieldBroadcastBlock, FieldIndexBlock, FieldMapBlock, FieldSampleBlock, FieldZipBlock,
};
pub use functions::register_functions;
pub use render::RenderCirclesBlock;
pub use signals::{AddBlock, ConstantBlock, MultiplyBlock, RelayBlock, TimeBlock};
pub use state_blocks::{Accumulator, Delay, Integrator, Phase, SampleHold};

/// Registers every built-in into `registries`.
pub fn register_all(registries: &mut Registries) {
    register_functions(&mut registries.functions);

    let blocks = &mut registries.blocks;
    blocks.register(Arc::new(ConstantBlock::new()));
    blocks.register(Arc::new(TimeBlock::new()));
    blocks.register(Arc::new(RelayBlock::new()));
    blocks.register(Arc::new(AddBlock::new()));
    blocks.register(Arc::new(MultiplyBlock::new()));
    blocks.register(Arc::new(DomainCountBlock::new()));
    blocks.register(Arc::new(DomainGridBlock::new()));
    blocks.register(Arc::new(FieldIndexBlock::new()));
    blocks.register(Arc::new(FieldMapBlock::new()));
    blocks.register(Arc::new(FieldZipBlock::new()));
    blocks.register(Arc::new(FieldBroadcastBlock::new()));
    blocks.register(Arc::new(FieldSampleBlock::new()));
    blocks.register(Arc::new(RenderCirclesBlock::new()));

    let states = &mut registries.state_blocks;
    states.register(Arc::new(Accumulator));
    states.register(Arc::new(Delay));
    states.register(Arc::new(SampleHold));
    states.register(Arc::new(Integrator));
    states.register(Arc::new(Phase));

    debug!(
        "registered builtins: {} blocks, {} state blocks, {} functions",
        registries.blocks.type_names().len(),
        registries.state_blocks.type_names().len(),
        registries.functions.names().len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all() {
        let registries = Registries::with_builtins();
        assert!(registries.blocks.contains("render.circles"));
        assert!(registries.blocks.contains("field.map"));
        assert!(registries.state_blocks.is_state_block("accumulator"));
        assert!(!registries.state_blocks.is_state_block("math.add"));
        assert!(registries.functions.contains("sin"));
        assert_eq!(registries.state_blocks.type_names().len(), 5);
    }
}
