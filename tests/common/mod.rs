//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]

use std::sync::Arc;

use concolic_path_explorer::{
    explorer::{self, Explorer},
    ir::{
        BinaryOp,
        CmpOp,
        Const,
        Instruction,
        Method,
        MethodBuilder,
        Program,
        Terminator,
        TypeSig,
        UnaryOp,
        Value,
    },
};

/// Constructs an explorer over the provided methods with the built-in
/// backend and runner, seeded for reproducibility.
#[allow(unused)] // It is actually
pub fn explorer_for(methods: Vec<Method>, seed: u64) -> anyhow::Result<Explorer> {
    let program = Arc::new(Program::new(methods)?);
    Ok(concolic_path_explorer::new(
        program,
        explorer::Config::default().with_seed(seed),
    ))
}

/// Builds `f(x) { if (x > 0) return 1; else return -1; }`.
#[allow(unused)] // It is actually
pub fn branching() -> anyhow::Result<Method> {
    let mut b = MethodBuilder::new("f", [TypeSig::Int], Some(TypeSig::Int));
    let entry = b.block();
    let then = b.block();
    let els = b.block();
    let cond = b.local(TypeSig::Bool);
    b.push(entry, Instruction::Cmp {
        result: cond,
        op:     CmpOp::Gt,
        lhs:    Value::Arg(0),
        rhs:    Value::Const(Const::Int(0)),
    });
    b.terminate(entry, Terminator::Branch {
        cond:     Value::Local(cond),
        on_true:  then,
        on_false: els,
    });
    b.terminate(then, Terminator::Return {
        value: Some(Value::Const(Const::Int(1))),
    });
    b.terminate(els, Terminator::Return {
        value: Some(Value::Const(Const::Int(-1))),
    });
    Ok(b.finish()?)
}

/// Builds `label(x) { switch (x) { case 1: return 10; case 5: return 50;
/// default: return 0; } }`.
#[allow(unused)] // It is actually
pub fn labelled() -> anyhow::Result<Method> {
    let mut b = MethodBuilder::new("label", [TypeSig::Int], Some(TypeSig::Int));
    let entry = b.block();
    let one = b.block();
    let five = b.block();
    let fallthrough = b.block();
    b.terminate(entry, Terminator::Switch {
        key:     Value::Arg(0),
        cases:   vec![(1, one), (5, five)],
        default: fallthrough,
    });
    for (block, result) in [(one, 10), (five, 50), (fallthrough, 0)] {
        b.terminate(block, Terminator::Return {
            value: Some(Value::Const(Const::Int(result))),
        });
    }
    Ok(b.finish()?)
}

/// Builds `pick(a) { if (a.length > 1) { if (a[0] > a[1]) return 1; else
/// return 2; } return 0; }`.
#[allow(unused)] // It is actually
pub fn picking() -> anyhow::Result<Method> {
    let mut b = MethodBuilder::new(
        "pick",
        [TypeSig::array_of(TypeSig::Int)],
        Some(TypeSig::Int),
    );
    let entry = b.block();
    let inner = b.block();
    let first = b.block();
    let second = b.block();
    let fallthrough = b.block();

    let len = b.local(TypeSig::Int);
    let long_enough = b.local(TypeSig::Bool);
    b.push(entry, Instruction::Unary {
        result:  len,
        op:      UnaryOp::Length,
        operand: Value::Arg(0),
    });
    b.push(entry, Instruction::Cmp {
        result: long_enough,
        op:     CmpOp::Gt,
        lhs:    Value::Local(len),
        rhs:    Value::Const(Const::Int(1)),
    });
    b.terminate(entry, Terminator::Branch {
        cond:     Value::Local(long_enough),
        on_true:  inner,
        on_false: fallthrough,
    });

    let x = b.local(TypeSig::Int);
    let y = b.local(TypeSig::Int);
    let bigger = b.local(TypeSig::Bool);
    b.push(inner, Instruction::ArrayLoad {
        result: x,
        array:  Value::Arg(0),
        index:  Value::Const(Const::Int(0)),
    });
    b.push(inner, Instruction::ArrayLoad {
        result: y,
        array:  Value::Arg(0),
        index:  Value::Const(Const::Int(1)),
    });
    b.push(inner, Instruction::Cmp {
        result: bigger,
        op:     CmpOp::Gt,
        lhs:    Value::Local(x),
        rhs:    Value::Local(y),
    });
    b.terminate(inner, Terminator::Branch {
        cond:     Value::Local(bigger),
        on_true:  first,
        on_false: second,
    });

    for (block, result) in [(first, 1), (second, 2), (fallthrough, 0)] {
        b.terminate(block, Terminator::Return {
            value: Some(Value::Const(Const::Int(result))),
        });
    }
    Ok(b.finish()?)
}

/// Builds a caller that bumps its argument before handing it on:
/// `caller(x) { return callee(x + 1); }` with
/// `callee(y) { if (y > 10) return 1; return 0; }`.
#[allow(unused)] // It is actually
pub fn call_pair() -> anyhow::Result<Vec<Method>> {
    let mut callee = MethodBuilder::new("callee", [TypeSig::Int], Some(TypeSig::Int));
    let entry = callee.block();
    let big = callee.block();
    let small = callee.block();
    let cond = callee.local(TypeSig::Bool);
    callee.push(entry, Instruction::Cmp {
        result: cond,
        op:     CmpOp::Gt,
        lhs:    Value::Arg(0),
        rhs:    Value::Const(Const::Int(10)),
    });
    callee.terminate(entry, Terminator::Branch {
        cond:     Value::Local(cond),
        on_true:  big,
        on_false: small,
    });
    callee.terminate(big, Terminator::Return {
        value: Some(Value::Const(Const::Int(1))),
    });
    callee.terminate(small, Terminator::Return {
        value: Some(Value::Const(Const::Int(0))),
    });

    let mut caller = MethodBuilder::new("caller", [TypeSig::Int], Some(TypeSig::Int));
    let entry = caller.block();
    let bumped = caller.local(TypeSig::Int);
    let result = caller.local(TypeSig::Int);
    caller.push(entry, Instruction::Binary {
        result: bumped,
        op:     BinaryOp::Add,
        lhs:    Value::Arg(0),
        rhs:    Value::Const(Const::Int(1)),
    });
    caller.push(entry, Instruction::Call {
        result:   Some(result),
        method:   "callee".into(),
        receiver: None,
        args:     vec![Value::Local(bumped)],
    });
    caller.terminate(entry, Terminator::Return {
        value: Some(Value::Local(result)),
    });

    Ok(vec![caller.finish()?, callee.finish()?])
}
