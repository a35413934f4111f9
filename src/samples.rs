//! Sample native library
//!
//! Small functions exercising every marshalled kind: text in and out,
//! narrow and wide integers, floats, booleans, and integer sequences in
//! both directions. Each body reads its arguments through the call's
//! ledger and allocates any heap result there.

use smallvec::SmallVec;

use crate::interop::{
    ErrorTag, FunctionDescriptor, NativeFault, Registry, RegistryBuilder, RegistryError, TypeTag, Value,
};
use crate::allocator::AllocError;
use crate::ledger::{Ledger, LedgerError};

pub const GREETING: &str = "Hello from native!";

// Hosts match on the message text, which is the bare exception name
pub const DIVISION_BY_ZERO: ErrorTag = ErrorTag::new("ValueError");
pub const OVERFLOW: ErrorTag = ErrorTag::new("Overflow");
pub const NEGATIVE_LENGTH: ErrorTag = ErrorTag::new("NegativeLength");

/// Register every sample function
pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    use crate::interop::IntWidth::I32;

    let int = TypeTag::int;
    let ints = || TypeTag::seq(TypeTag::int());

    builder.register(
        FunctionDescriptor::new("hello").returns(TypeTag::Str).doc("Return a fixed greeting"),
        hello,
    )?;
    builder.register(
        FunctionDescriptor::new("greet")
            .param(TypeTag::Str)
            .returns(TypeTag::Str)
            .doc("Echo a text value"),
        greet,
    )?;
    builder.register(
        FunctionDescriptor::new("add")
            .param(TypeTag::Int(I32))
            .param(TypeTag::Int(I32))
            .returns(TypeTag::Int(I32))
            .error(OVERFLOW.name())
            .doc("Add two 32-bit integers"),
        add,
    )?;
    builder.register(
        FunctionDescriptor::new("multiply")
            .param(TypeTag::Float)
            .param(TypeTag::Float)
            .returns(TypeTag::Float),
        multiply,
    )?;
    builder.register(
        FunctionDescriptor::new("divide")
            .param(TypeTag::Float)
            .param(TypeTag::Float)
            .returns(TypeTag::Float)
            .error(DIVISION_BY_ZERO.name())
            .doc("Divide two floats; a zero divisor is an error"),
        divide,
    )?;
    builder.register(
        FunctionDescriptor::new("is_positive").param(int()).returns(TypeTag::Bool),
        is_positive,
    )?;
    builder.register(
        FunctionDescriptor::new("sum_list")
            .param(ints())
            .returns(int())
            .error(OVERFLOW.name())
            .doc("Sum a list of integers"),
        sum_list,
    )?;
    builder.register(
        FunctionDescriptor::new("make_list")
            .param(int())
            .returns(ints())
            .error(NEGATIVE_LENGTH.name())
            .doc("Return [0, 1, ..., n - 1]"),
        make_list,
    )?;
    builder.register(
        FunctionDescriptor::new("double_list")
            .param(ints())
            .returns(ints())
            .error(OVERFLOW.name())
            .doc("Double every element of a list of integers"),
        double_list,
    )?;
    Ok(())
}

/// Fresh registry holding only the sample library
pub fn registry() -> Result<Registry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    register(&mut builder)?;
    Ok(builder.freeze())
}

// Arguments have already been checked against the descriptor, so the
// extractors below only fail if the table and the body disagree.

fn int_arg(args: &[Value], index: usize) -> Result<i64, NativeFault> {
    args.get(index).and_then(Value::as_int).ok_or_else(|| signature_mismatch(index))
}

fn float_arg(args: &[Value], index: usize) -> Result<f64, NativeFault> {
    args.get(index).and_then(Value::as_float).ok_or_else(|| signature_mismatch(index))
}

fn arg(args: &[Value], index: usize) -> Result<Value, NativeFault> {
    args.get(index).copied().ok_or_else(|| signature_mismatch(index))
}

fn signature_mismatch(index: usize) -> NativeFault {
    NativeFault::Error(ErrorTag::new("SignatureMismatch").with_message(format!("argument {}", index + 1)))
}

fn hello(ledger: &mut Ledger<'_>, _: &[Value]) -> Result<Value, NativeFault> {
    Ok(ledger.alloc_str(GREETING)?)
}

fn greet(ledger: &mut Ledger<'_>, args: &[Value]) -> Result<Value, NativeFault> {
    let name = arg(args, 0)?;
    // The argument buffer is released with the call; the result needs its own.
    let text = ledger.str(name)?.to_owned();
    Ok(ledger.alloc_str(&text)?)
}

fn add(_: &mut Ledger<'_>, args: &[Value]) -> Result<Value, NativeFault> {
    let (a, b) = (int_arg(args, 0)?, int_arg(args, 1)?);
    let a = i32::try_from(a).map_err(|_| signature_mismatch(0))?;
    let b = i32::try_from(b).map_err(|_| signature_mismatch(1))?;
    a.checked_add(b)
        .map(|sum| Value::Int(sum.into()))
        .ok_or_else(|| OVERFLOW.with_message(format!("{} + {}", a, b)).into())
}

fn multiply(_: &mut Ledger<'_>, args: &[Value]) -> Result<Value, NativeFault> {
    Ok(Value::Float(float_arg(args, 0)? * float_arg(args, 1)?))
}

fn divide(_: &mut Ledger<'_>, args: &[Value]) -> Result<Value, NativeFault> {
    let (x, y) = (float_arg(args, 0)?, float_arg(args, 1)?);
    if y == 0.0 {
        return Err(DIVISION_BY_ZERO.with_message(format!("{} / {}", x, y)).into());
    }
    Ok(Value::Float(x / y))
}

fn is_positive(_: &mut Ledger<'_>, args: &[Value]) -> Result<Value, NativeFault> {
    Ok(Value::Bool(int_arg(args, 0)? > 0))
}

fn sum_list(ledger: &mut Ledger<'_>, args: &[Value]) -> Result<Value, NativeFault> {
    let items = ledger.seq(arg(args, 0)?)?;
    let mut total: i64 = 0;
    for item in items {
        let v = item.as_int().ok_or_else(|| signature_mismatch(0))?;
        total = total.checked_add(v).ok_or(OVERFLOW)?;
    }
    Ok(Value::Int(total))
}

fn make_list(ledger: &mut Ledger<'_>, args: &[Value]) -> Result<Value, NativeFault> {
    let n = int_arg(args, 0)?;
    if n < 0 {
        return Err(NEGATIVE_LENGTH.with_message(n.to_string()).into());
    }
    let len = usize::try_from(n).map_err(|_| LedgerError::from(AllocError::LayoutOverflow))?;
    Ok(ledger.alloc_seq_iter((0..len).map(|i| Value::Int(i as i64)))?)
}

fn double_list(ledger: &mut Ledger<'_>, args: &[Value]) -> Result<Value, NativeFault> {
    let items = ledger.seq(arg(args, 0)?)?;
    let mut doubled: SmallVec<[Value; 16]> = SmallVec::with_capacity(items.len());
    for item in items {
        let v = item.as_int().ok_or_else(|| signature_mismatch(0))?;
        let v = v.checked_mul(2).ok_or_else(|| OVERFLOW.with_message(format!("2 * {}", v)))?;
        doubled.push(Value::Int(v));
    }
    Ok(ledger.alloc_seq(&doubled)?)
}
