//! End-to-end bridge tests: rejection, leak checks, concurrency, configuration

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tempfile::NamedTempFile;
use typthon_bind::interop::{DynamicHost, HostValue, NativeFault};
use typthon_bind::logging::{LogFormat, LogLevel};
use typthon_bind::{
    samples, BridgeConfig, Dispatcher, ExceptionKind, FunctionDescriptor, Ledger, NativeAllocator,
    RegistryBuilder, TypeTag, Value,
};

static PAIR_CALLS: AtomicUsize = AtomicUsize::new(0);

fn counted_pair(_: &mut Ledger<'_>, args: &[Value]) -> Result<Value, NativeFault> {
    PAIR_CALLS.fetch_add(1, Ordering::SeqCst);
    Ok(Value::Int(args.len() as i64))
}

#[test]
fn test_arity_rejected_before_native_code() {
    let mut builder = RegistryBuilder::new();
    builder
        .register(
            FunctionDescriptor::new("pair")
                .param(TypeTag::int())
                .param(TypeTag::int())
                .returns(TypeTag::int()),
            counted_pair,
        )
        .unwrap();
    let registry = builder.freeze();
    let heap = NativeAllocator::new();
    let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

    for args in [vec![HostValue::from(1)], vec![1.into(), 2.into(), 3.into()]] {
        let exc = dispatcher.invoke_by_name(&DynamicHost, "pair", &args).unwrap_err();
        assert_eq!(exc.kind, ExceptionKind::TypeError);
    }
    assert_eq!(PAIR_CALLS.load(Ordering::SeqCst), 0);

    assert_eq!(
        dispatcher.invoke_by_name(&DynamicHost, "pair", &[1.into(), 2.into()]),
        Ok(HostValue::from(2))
    );
    assert_eq!(PAIR_CALLS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_sequence_type_rejection() {
    let registry = samples::registry().unwrap();
    let heap = NativeAllocator::new();
    let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

    let rejected = [
        HostValue::Dict(vec![("a".into(), 1.into())]),
        HostValue::None,
        HostValue::from("123"),
        HostValue::List(vec![1.into(), 2.5.into(), 3.into()]),
    ];
    for value in rejected {
        let exc = dispatcher.invoke_by_name(&DynamicHost, "sum_list", &[value]).unwrap_err();
        assert_eq!(exc.kind, ExceptionKind::TypeError, "{}", exc);
    }

    // Byte strings index as ints but are not lists
    let exc = dispatcher
        .invoke_by_name(&DynamicHost, "sum_list", &[HostValue::Bytes(b"abc".to_vec())])
        .unwrap_err();
    assert_eq!(exc.message, "sum_list() argument 1 must be list[int], not bytes");

    let exc = dispatcher
        .invoke_by_name(&DynamicHost, "double_list", &[HostValue::List(vec![1.into(), "2".into()])])
        .unwrap_err();
    assert_eq!(exc.message, "double_list() argument 1[1] must be int, not str");

    // Native errors use the other taxonomy
    let exc = dispatcher
        .invoke_by_name(&DynamicHost, "divide", &[1.into(), 0.into()])
        .unwrap_err();
    assert_eq!(exc.kind, ExceptionKind::ValueError);
}

#[test]
fn test_scalar_functions() {
    let registry = samples::registry().unwrap();
    let heap = NativeAllocator::new();
    let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);
    let call = |name: &str, args: &[HostValue]| dispatcher.invoke_by_name(&DynamicHost, name, args);

    assert_eq!(call("add", &[2.into(), 3.into()]), Ok(HostValue::from(5)));
    assert_eq!(call("multiply", &[1.5.into(), 4.into()]), Ok(HostValue::from(6.0)));
    assert_eq!(call("is_positive", &[7.into()]), Ok(HostValue::from(true)));
    assert_eq!(call("is_positive", &[(-7).into()]), Ok(HostValue::from(false)));

    // bool is not an integer here
    assert_eq!(call("is_positive", &[true.into()]).unwrap_err().kind, ExceptionKind::TypeError);
    // add takes i32 arguments
    let exc = call("add", &[HostValue::from(1i64 << 40), 1.into()]).unwrap_err();
    assert_eq!(exc.kind, ExceptionKind::TypeError);
}

#[test]
fn test_double_list_overflow_raises() {
    let registry = samples::registry().unwrap();
    let heap = NativeAllocator::new();
    let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

    for extreme in [i64::MAX, i64::MIN] {
        let exc = dispatcher
            .invoke_by_name(&DynamicHost, "double_list", &[HostValue::list([extreme])])
            .unwrap_err();
        assert_eq!(exc.kind, ExceptionKind::ValueError);
        assert_eq!(exc.message, "Overflow");
    }
    assert_eq!(dispatcher.stats().native_errors, 2);
    assert!(heap.stats().is_balanced());
}

#[test]
fn test_no_leak_over_repeated_calls() {
    let registry = samples::registry().unwrap();
    let heap = NativeAllocator::new();
    let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

    for _ in 0..1000 {
        let made = dispatcher.invoke_by_name(&DynamicHost, "make_list", &[100.into()]).unwrap();
        assert_eq!(made.as_list().map(<[HostValue]>::len), Some(100));
    }

    // Failure paths must not leak either
    for _ in 0..100 {
        let bad = HostValue::List(vec![1.into(), 2.into(), HostValue::None]);
        dispatcher.invoke_by_name(&DynamicHost, "double_list", &[bad]).unwrap_err();
        dispatcher
            .invoke_by_name(&DynamicHost, "make_list", &[(-3).into()])
            .unwrap_err();
        dispatcher.invoke_by_name(&DynamicHost, "greet", &["leak?".into()]).unwrap();
    }

    let stats = heap.stats();
    assert_eq!(stats.outstanding_bytes, 0);
    assert_eq!(stats.outstanding_blocks, 0);
    assert_eq!(stats.total_allocs, stats.total_frees + stats.total_adopted);
}

#[test]
fn test_concurrent_dispatch() {
    let registry = samples::registry().unwrap();
    let heap = NativeAllocator::new();
    let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

    let sums: Vec<i128> = (0..256i64)
        .into_par_iter()
        .map(|n| {
            let made = dispatcher.invoke_by_name(&DynamicHost, "make_list", &[n.into()]).unwrap();
            let doubled = dispatcher.invoke_by_name(&DynamicHost, "double_list", &[made]).unwrap();
            let sum = dispatcher.invoke_by_name(&DynamicHost, "sum_list", &[doubled]).unwrap();
            sum.as_int().unwrap()
        })
        .collect();

    for (n, sum) in sums.into_iter().enumerate() {
        let n = n as i128;
        assert_eq!(sum, n * (n - 1));
    }
    assert!(heap.stats().is_balanced());
    assert_eq!(dispatcher.stats().calls_made, 256 * 3);
}

#[test]
fn test_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
max_call_bytes = 128

[log]
level = "warn"
format = "json"
"#
    )
    .unwrap();

    let config = BridgeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_call_bytes, Some(128));
    assert_eq!(config.log.level, LogLevel::Warn);
    assert_eq!(config.log.format, LogFormat::Json);

    let registry = samples::registry().unwrap();
    let heap = NativeAllocator::new();
    let dispatcher = Dispatcher::new(&registry).with_allocator(&heap).with_config(&config);

    // 100 values do not fit in 128 bytes
    let exc = dispatcher.invoke_by_name(&DynamicHost, "make_list", &[100.into()]).unwrap_err();
    assert_eq!(exc.kind, ExceptionKind::RuntimeError);
    assert!(heap.stats().is_balanced());
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = BridgeConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().starts_with("failed to read config"));
}
