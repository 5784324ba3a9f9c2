//! Tests exploration of a method whose body is a single two-way branch.
#![cfg(test)]

mod common;

use concolic_path_explorer::{ExplorationReport, RecoveredValue};

fn first_int_args(report: &ExplorationReport) -> Vec<i32> {
    report
        .inputs
        .iter()
        .filter_map(|inputs| match inputs.args.first() {
            Some(RecoveredValue::Int(v)) => Some(*v),
            _ => None,
        })
        .collect()
}

#[test]
fn covers_both_outcomes_of_a_branch() -> anyhow::Result<()> {
    let mut explorer = common::explorer_for(vec![common::branching()?], 1)?;
    let report = explorer.run("f")?;

    assert!(report.exhausted);
    assert!(report.errors.is_empty());
    assert!(report.inputs.len() >= 2);

    let args = first_int_args(&report);
    assert!(args.iter().any(|v| *v > 0));
    assert!(args.iter().any(|v| *v <= 0));

    Ok(())
}

#[test]
fn exploration_is_reproducible_for_a_fixed_seed() -> anyhow::Result<()> {
    let mut first = common::explorer_for(vec![common::branching()?], 42)?;
    let mut second = common::explorer_for(vec![common::branching()?], 42)?;

    let args_first = first_int_args(&first.run("f")?);
    let args_second = first_int_args(&second.run("f")?);

    assert_eq!(args_first, args_second);

    Ok(())
}

#[test]
fn an_unknown_method_is_an_error() -> anyhow::Result<()> {
    let mut explorer = common::explorer_for(vec![common::branching()?], 1)?;

    assert!(explorer.run("missing").is_err());

    Ok(())
}
