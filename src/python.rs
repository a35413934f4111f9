//! Python extension module
//!
//! `PythonHost` implements the host protocol over the limited (abi3) C API
//! only. Every registered native function is exposed as a callable
//! `NativeFunction` attribute of the `typthon_bind` module.

use std::borrow::Cow;
use std::collections::HashMap;

use once_cell::sync::OnceCell;
use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyByteArray, PyBytes, PyDict, PyFloat, PyFrozenSet, PyList, PyLong, PySequence, PySet, PyString, PyTuple};
use smallvec::SmallVec;
use tracing_appender::non_blocking::WorkerGuard;

use crate::allocator::NativeAllocator;
use crate::config::{self, BridgeConfig};
use crate::interop::{self, Dispatcher, ExceptionKind, FunctionId, HostException, HostProtocol, Shape};
use crate::{logging, samples};

static DISPATCHER: OnceCell<Dispatcher<'static>> = OnceCell::new();
static LOG_GUARD: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Host adapter over live Python objects
#[derive(Clone, Copy)]
pub struct PythonHost<'py> {
    py: Python<'py>,
}

impl<'py> PythonHost<'py> {
    pub fn new(py: Python<'py>) -> Self {
        Self { py }
    }
}

fn host_error(err: PyErr) -> HostException {
    HostException::runtime_error(err.to_string())
}

fn type_name(obj: &PyAny) -> String {
    obj.get_type()
        .name()
        .map(str::to_owned)
        .unwrap_or_else(|_| "object".to_owned())
}

impl<'py> HostProtocol for PythonHost<'py> {
    type Object = &'py PyAny;

    fn shape(&self, obj: &&'py PyAny) -> Shape {
        let obj = *obj;
        // bool subclasses int, so it must be classified first
        if obj.is_none() {
            Shape::None
        } else if obj.is_instance_of::<PyBool>() {
            Shape::Bool
        } else if obj.is_instance_of::<PyLong>() {
            Shape::Int
        } else if obj.is_instance_of::<PyFloat>() {
            Shape::Float
        } else if obj.is_instance_of::<PyString>() {
            Shape::Text
        } else if obj.is_instance_of::<PyDict>() {
            Shape::Mapping
        } else if obj.is_instance_of::<PySet>() || obj.is_instance_of::<PyFrozenSet>() {
            Shape::Set
        } else if obj.is_instance_of::<PyBytes>() || obj.is_instance_of::<PyByteArray>() {
            // byte strings are sequences of ints to Python, but not lists here
            Shape::Other(type_name(obj))
        } else if let Ok(seq) = obj.downcast::<PySequence>() {
            match seq.len() {
                Ok(len) => Shape::Sequence { len },
                Err(_) => Shape::Iterator,
            }
        } else if obj.hasattr("__iter__").unwrap_or(false) {
            Shape::Iterator
        } else {
            Shape::Other(type_name(obj))
        }
    }

    fn int_value(&self, obj: &&'py PyAny) -> Option<i64> {
        obj.extract::<i64>().ok()
    }

    fn float_value(&self, obj: &&'py PyAny) -> Option<f64> {
        obj.extract::<f64>().ok()
    }

    fn bool_value(&self, obj: &&'py PyAny) -> bool {
        obj.downcast::<PyBool>().map(PyBool::is_true).unwrap_or(false)
    }

    fn text_value<'o>(&self, obj: &'o &'py PyAny) -> Result<Cow<'o, str>, HostException> {
        let text = obj
            .downcast::<PyString>()
            .map_err(|e| HostException::type_error(e.to_string()))?;
        text.to_str().map(Cow::Borrowed).map_err(host_error)
    }

    fn item(&self, obj: &&'py PyAny, index: usize) -> Result<&'py PyAny, HostException> {
        let seq = obj
            .downcast::<PySequence>()
            .map_err(|e| HostException::type_error(e.to_string()))?;
        seq.get_item(index).map_err(host_error)
    }

    fn repr(&self, obj: &&'py PyAny) -> String {
        obj.repr()
            .map(|r| r.to_string())
            .unwrap_or_else(|_| "<unrepresentable object>".to_owned())
    }

    fn none(&self) -> &'py PyAny {
        self.py.None().into_ref(self.py)
    }

    fn new_int(&self, value: i64) -> &'py PyAny {
        value.into_py(self.py).into_ref(self.py)
    }

    fn new_float(&self, value: f64) -> &'py PyAny {
        value.into_py(self.py).into_ref(self.py)
    }

    fn new_bool(&self, value: bool) -> &'py PyAny {
        PyBool::new(self.py, value).as_ref()
    }

    fn new_text(&self, text: String) -> &'py PyAny {
        PyString::new(self.py, &text).as_ref()
    }

    fn new_list(&self, items: Vec<&'py PyAny>) -> Result<&'py PyAny, HostException> {
        Ok(PyList::new(self.py, items).as_ref())
    }
}

impl From<HostException> for PyErr {
    fn from(exc: HostException) -> Self {
        match exc.kind {
            ExceptionKind::TypeError => PyTypeError::new_err(exc.message),
            ExceptionKind::ValueError => PyValueError::new_err(exc.message),
            ExceptionKind::RuntimeError => PyRuntimeError::new_err(exc.message),
        }
    }
}

fn logging_requested() -> bool {
    [config::ENV_LOG_LEVEL, config::ENV_LOG_JSON, config::ENV_LOG_FILE, config::ENV_TRACE_CALLS]
        .iter()
        .any(|var| std::env::var_os(var).is_some())
}

/// The process-wide dispatcher, created on first use
fn dispatcher() -> PyResult<&'static Dispatcher<'static>> {
    DISPATCHER.get_or_try_init(|| {
        let config = BridgeConfig::from_env().map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        if logging_requested() {
            LOG_GUARD.get_or_init(|| logging::init(&config.log));
        }

        crate::init();
        let registry = interop::get_or_install(samples::register)
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        Ok(Dispatcher::new(registry)
            .with_allocator(NativeAllocator::global())
            .with_config(&config))
    })
}

/// A bound native function callable from Python
#[pyclass(frozen, module = "typthon_bind")]
pub struct NativeFunction {
    id: FunctionId,
    name: String,
    signature: String,
}

#[pymethods]
impl NativeFunction {
    #[pyo3(signature = (*args))]
    fn __call__(&self, py: Python<'_>, args: &PyTuple) -> PyResult<PyObject> {
        let dispatcher = dispatcher()?;
        let args: SmallVec<[&PyAny; 4]> = args.iter().collect();
        let result = dispatcher.invoke(&PythonHost::new(py), self.id, &args)?;
        Ok(result.into_py(py))
    }

    #[getter]
    fn name(&self) -> String {
        self.name.clone()
    }

    #[getter]
    fn signature(&self) -> String {
        self.signature.clone()
    }

    fn __repr__(&self) -> String {
        format!("<native function {}>", self.signature)
    }
}

/// Allocator and dispatch counters
#[pyfunction]
fn stats() -> PyResult<HashMap<&'static str, usize>> {
    let dispatcher = dispatcher()?;
    let heap = dispatcher.allocator().stats();
    let calls = dispatcher.stats();

    Ok(HashMap::from([
        ("outstanding_bytes", heap.outstanding_bytes),
        ("outstanding_blocks", heap.outstanding_blocks),
        ("total_allocs", heap.total_allocs),
        ("total_frees", heap.total_frees),
        ("total_adopted", heap.total_adopted),
        ("calls_made", calls.calls_made),
        ("native_invocations", calls.native_invocations),
        ("marshaling_errors", calls.marshaling_errors),
        ("native_errors", calls.native_errors),
        ("internal_failures", calls.internal_failures),
    ]))
}

#[pymodule]
fn typthon_bind(py: Python<'_>, m: &PyModule) -> PyResult<()> {
    let registry = dispatcher()?.registry();

    for (id, function) in registry.iter() {
        let descriptor = function.descriptor();
        let bound = Py::new(
            py,
            NativeFunction {
                id,
                name: descriptor.name.clone(),
                signature: descriptor.signature(),
            },
        )?;
        m.add(descriptor.name.as_str(), bound)?;
    }

    m.add("__signatures__", registry.manifest().to_string())?;
    m.add_class::<NativeFunction>()?;
    m.add_function(wrap_pyfunction!(stats, m)?)?;
    Ok(())
}
