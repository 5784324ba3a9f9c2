//! Tests exploration of a method dispatching through a lookup switch.
#![cfg(test)]

mod common;

use concolic_path_explorer::RecoveredValue;

#[test]
fn covers_every_case_and_the_default() -> anyhow::Result<()> {
    let mut explorer = common::explorer_for(vec![common::labelled()?], 3)?;
    let report = explorer.run("label")?;

    assert!(report.exhausted);
    assert!(report.inputs.len() >= 3);

    let keys: Vec<i32> = report
        .inputs
        .iter()
        .filter_map(|inputs| match inputs.args.first() {
            Some(RecoveredValue::Int(v)) => Some(*v),
            _ => None,
        })
        .collect();

    assert!(keys.contains(&1));
    assert!(keys.contains(&5));
    assert!(keys.iter().any(|k| *k != 1 && *k != 5));

    Ok(())
}
