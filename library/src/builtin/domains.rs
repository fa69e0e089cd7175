//! Domain sources.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::compiler::lowering::config_number;
use crate::core::compiler::{
    BlockKernel, FrameContext, KernelInputs, LoweredBlock, LoweringContext, ResolvedInputs,
};
use crate::core::domain::Domain;
use crate::core::field::FieldExpr;
use crate::core::output::{PortValue, PortValues};
use crate::error::LibraryError;
use crate::model::value::{Value, Vec2};

/// Reads a non-negative integer config entry.
fn config_count(
    ctx: &LoweringContext,
    config: &serde_json::Value,
    key: &str,
    default: usize,
) -> Result<usize, LibraryError> {
    match config_number(config, key) {
        None => Ok(default),
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        Some(n) => Err(LibraryError::lowering(format!(
            "{} '{}': '{}' must be a non-negative integer, got {}",
            ctx.type_id, ctx.block_id, key, n
        ))),
    }
}

super::define_block!(DomainCountBlock, type_name: "domain.count", inputs: []);

impl DomainCountBlock {
    fn lower_block(
        &self,
        ctx: &LoweringContext,
        _inputs: &ResolvedInputs,
        config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        let count = config_count(ctx, config, "count", 1)?;
        let domain = match config.get("seed").and_then(serde_json::Value::as_u64) {
            Some(seed) => Domain::from_seed(ctx.block_id, count, seed),
            None => Domain::from_count(ctx.block_id, count),
        };
        Ok(LoweredBlock::new(
            &["domain"],
            DomainKernel {
                domain: Arc::new(domain),
            },
        ))
    }
}

struct DomainKernel {
    domain: Arc<Domain>,
}

impl BlockKernel for DomainKernel {
    fn run(
        &self,
        _inputs: &KernelInputs,
        _frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        Ok(BTreeMap::from([(
            "domain".to_string(),
            PortValue::Domain(self.domain.clone()),
        )]))
    }
}

super::define_block!(DomainGridBlock, type_name: "domain.grid", inputs: []);

impl DomainGridBlock {
    fn lower_block(
        &self,
        ctx: &LoweringContext,
        _inputs: &ResolvedInputs,
        config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        let rows = config_count(ctx, config, "rows", 1)?;
        let cols = config_count(ctx, config, "cols", 1)?;
        let spacing = config_number(config, "spacing").unwrap_or(40.0);
        Ok(LoweredBlock::new(
            &["domain", "positions", "cells"],
            GridKernel {
                domain: Arc::new(Domain::grid(ctx.block_id, rows, cols)),
                rows,
                cols,
                spacing,
            },
        ))
    }
}

/// Grid domain plus cell centers laid out around the middle of the output
/// surface. `positions` is a field reading `cells` by element position.
struct GridKernel {
    domain: Arc<Domain>,
    rows: usize,
    cols: usize,
    spacing: f64,
}

impl BlockKernel for GridKernel {
    fn run(
        &self,
        _inputs: &KernelInputs,
        frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        let origin_x =
            frame.runtime.width / 2.0 - (self.cols.max(1) - 1) as f64 * self.spacing / 2.0;
        let origin_y =
            frame.runtime.height / 2.0 - (self.rows.max(1) - 1) as f64 * self.spacing / 2.0;
        let mut cells = Vec::with_capacity(self.rows * self.cols);
        for row in 0..self.rows {
            for col in 0..self.cols {
                cells.push(Value::from(Vec2::new(
                    origin_x + col as f64 * self.spacing,
                    origin_y + row as f64 * self.spacing,
                )));
            }
        }

        Ok(BTreeMap::from([
            (
                "domain".to_string(),
                PortValue::Domain(self.domain.clone()),
            ),
            (
                "positions".to_string(),
                PortValue::Field(FieldExpr::source(frame.output_ref("cells"))),
            ),
            ("cells".to_string(), PortValue::Signal(Value::Array(cells))),
        ]))
    }
}
