//! Property tests for the sample list and arithmetic functions

use proptest::prelude::*;
use typthon_bind::interop::{DynamicHost, HostValue};
use typthon_bind::{samples, Dispatcher, ExceptionKind, HostException, NativeAllocator, Registry};

fn registry() -> Registry {
    samples::registry().expect("sample registry")
}

fn call(
    dispatcher: &Dispatcher<'_>,
    name: &str,
    args: Vec<HostValue>,
) -> Result<HostValue, HostException> {
    dispatcher.invoke_by_name(&DynamicHost, name, &args)
}

fn int(value: &HostValue) -> i128 {
    value.as_int().expect("integer result")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sum_of_make_is_triangular(n in 0i64..2_000) {
        let registry = registry();
        let heap = NativeAllocator::new();
        let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

        let made = call(&dispatcher, "make_list", vec![n.into()]).unwrap();
        let sum = call(&dispatcher, "sum_list", vec![made]).unwrap();

        prop_assert_eq!(int(&sum), i128::from(n * (n - 1) / 2));
        prop_assert!(heap.stats().is_balanced());
    }

    #[test]
    fn double_doubles_every_element(s in prop::collection::vec(-(1i64 << 60)..(1i64 << 60), 0..64)) {
        let registry = registry();
        let heap = NativeAllocator::new();
        let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

        let doubled = call(&dispatcher, "double_list", vec![HostValue::list(s.clone())]).unwrap();
        let doubled = doubled.int_list().expect("list of integers");

        prop_assert_eq!(doubled.len(), s.len());
        for (i, v) in s.iter().enumerate() {
            prop_assert_eq!(doubled[i], 2 * i128::from(*v));
        }
    }

    #[test]
    fn sum_of_doubled_make(n in 0i64..2_000) {
        let registry = registry();
        let heap = NativeAllocator::new();
        let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

        let made = call(&dispatcher, "make_list", vec![n.into()]).unwrap();
        let doubled = call(&dispatcher, "double_list", vec![made]).unwrap();
        let sum = call(&dispatcher, "sum_list", vec![doubled]).unwrap();

        prop_assert_eq!(int(&sum), i128::from(n * (n - 1)));
        prop_assert!(heap.stats().is_balanced());
    }

    #[test]
    fn divide_by_zero_always_raises(x in prop::num::f64::ANY) {
        let registry = registry();
        let heap = NativeAllocator::new();
        let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

        let exc = call(&dispatcher, "divide", vec![x.into(), 0.0.into()]).unwrap_err();
        prop_assert_eq!(exc.kind, ExceptionKind::ValueError);
        prop_assert_eq!(exc.to_string(), "ValueError");
    }

    #[test]
    fn divide_matches_float_division(x in -1e12f64..1e12, y in -1e6f64..1e6) {
        prop_assume!(y != 0.0);
        let registry = registry();
        let heap = NativeAllocator::new();
        let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

        let quotient = call(&dispatcher, "divide", vec![x.into(), y.into()]).unwrap();
        let quotient = quotient.as_float().expect("float result");
        prop_assert!((quotient - x / y).abs() <= 1e-9 * (x / y).abs().max(1.0));
    }

    #[test]
    fn integer_divisors_are_widened(x in -1_000i32..1_000, y in 1i32..1_000) {
        let registry = registry();
        let heap = NativeAllocator::new();
        let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

        let quotient = call(&dispatcher, "divide", vec![x.into(), y.into()]).unwrap();
        prop_assert_eq!(quotient, HostValue::Float(f64::from(x) / f64::from(y)));
    }
}

#[test]
fn make_zero_is_empty_list() {
    let registry = registry();
    let heap = NativeAllocator::new();
    let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);
    assert_eq!(call(&dispatcher, "make_list", vec![0.into()]), Ok(HostValue::List(vec![])));
}

#[test]
fn double_empty_is_empty() {
    let registry = registry();
    let heap = NativeAllocator::new();
    let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);
    assert_eq!(
        call(&dispatcher, "double_list", vec![HostValue::List(vec![])]),
        Ok(HostValue::List(vec![]))
    );
}

#[test]
fn double_twice() {
    let registry = registry();
    let heap = NativeAllocator::new();
    let dispatcher = Dispatcher::new(&registry).with_allocator(&heap);

    let once = call(&dispatcher, "double_list", vec![HostValue::list([1, 2, 3])]).unwrap();
    let twice = call(&dispatcher, "double_list", vec![once]).unwrap();
    assert_eq!(twice, HostValue::list([4, 8, 12]));
}
