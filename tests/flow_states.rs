//! Tests the static dataflow walk that summarises whole acyclic methods as
//! predicate states.
#![cfg(test)]

mod common;

use std::sync::Arc;

use concolic_path_explorer::{
    builder::flow::FlowStateBuilder,
    ir::{MethodBuilder, Program, Terminator},
};

#[test]
fn summarises_a_branching_method() -> anyhow::Result<()> {
    let program = Arc::new(Program::new(vec![common::branching()?])?);
    let method = program.by_name("f").ok_or_else(|| anyhow::anyhow!("missing method"))?;
    let mut builder = FlowStateBuilder::new(Arc::clone(&program), method)?;

    // The entry block computes the comparison, so its exit state is larger
    // than its entry state.
    let entry = builder.block_entry(0)?;
    let exit = builder.block_exit(0)?;
    assert!(entry.is_empty());
    assert!(exit.len() > entry.len());

    // The whole method is a choice over its two returning blocks.
    let state = builder.method_state()?;
    assert!(!state.is_empty());

    Ok(())
}

#[test]
fn rejects_cyclic_control_flow() -> anyhow::Result<()> {
    let mut b = MethodBuilder::new("looping", [], None);
    let entry = b.block();
    b.terminate(entry, Terminator::Jump { target: entry });
    let program = Arc::new(Program::new(vec![b.finish()?])?);

    assert!(FlowStateBuilder::new(program, 0).is_err());

    Ok(())
}
