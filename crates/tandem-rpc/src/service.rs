//! Static description of service interfaces.
//!
//! A [`ServiceInterface`] names itself on the wire and fills a
//! [`MethodTable`] once, at registration. Each entry pairs a
//! [`MethodSignature`] with a closure that decodes arguments, calls the
//! implementation and encodes the return value, so dispatch is a string
//! lookup with no per-call reflection.

use crate::serializer::{SerializationError, Serializer};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tandem_transport::ClientContext;

/// Error returned by a listener method. Only the message reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceFault {
    message: String,
}

impl ServiceFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ServiceFault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ServiceFault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Role of a registered interface on this side of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceRole {
    /// Implemented here, called by the peer.
    Listener,
    /// Implemented by the peer, called from here.
    Proxy,
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceRole::Listener => f.write_str("listener"),
            ServiceRole::Proxy => f.write_str("proxy"),
        }
    }
}

/// Declared parameter and return types of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<&'static str>,
    pub returns: &'static str,
}

impl MethodSignature {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Argument list of a call, as a tuple of up to six values.
pub trait Args: Sized + Send + 'static {
    const ARITY: usize;

    fn type_names() -> Vec<&'static str>;

    fn encode<S: Serializer>(&self, serializer: &S) -> Result<Vec<Vec<u8>>, SerializationError>;

    fn decode<S: Serializer>(buffers: &[Vec<u8>], serializer: &S) -> Result<Self, SerializationError>;
}

impl Args for () {
    const ARITY: usize = 0;

    fn type_names() -> Vec<&'static str> {
        Vec::new()
    }

    fn encode<S: Serializer>(&self, _serializer: &S) -> Result<Vec<Vec<u8>>, SerializationError> {
        Ok(Vec::new())
    }

    fn decode<S: Serializer>(buffers: &[Vec<u8>], _serializer: &S) -> Result<Self, SerializationError> {
        check_count(buffers, 0)
    }
}

macro_rules! impl_args {
    ($count:literal; $($name:ident : $idx:tt),+) => {
        impl<$($name),+> Args for ($($name,)+)
        where
            $($name: Serialize + DeserializeOwned + Send + 'static),+
        {
            const ARITY: usize = $count;

            fn type_names() -> Vec<&'static str> {
                vec![$(type_name::<$name>()),+]
            }

            fn encode<S: Serializer>(&self, serializer: &S) -> Result<Vec<Vec<u8>>, SerializationError> {
                Ok(vec![$(serializer.serialize(&self.$idx, type_name::<$name>())?),+])
            }

            fn decode<S: Serializer>(buffers: &[Vec<u8>], serializer: &S) -> Result<Self, SerializationError> {
                check_count(buffers, $count)?;
                Ok(($(serializer.deserialize::<$name>(&buffers[$idx], type_name::<$name>())?,)+))
            }
        }
    };
}

impl_args!(1; A: 0);
impl_args!(2; A: 0, B: 1);
impl_args!(3; A: 0, B: 1, C: 2);
impl_args!(4; A: 0, B: 1, C: 2, D: 3);
impl_args!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_args!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

fn check_count(buffers: &[Vec<u8>], expected: usize) -> Result<(), SerializationError> {
    if buffers.len() == expected {
        Ok(())
    } else {
        Err(SerializationError::ArgumentCount {
            expected,
            actual: buffers.len(),
        })
    }
}

/// A listener instance with its interface type erased.
///
/// Holds an `Arc<I>` so unsized interfaces (`dyn Trait`) can be recovered.
pub(crate) type ErasedInstance = Arc<dyn Any + Send + Sync>;

/// Outcome of one invocation: the encoded return value, or fault text.
pub(crate) type Invocation = BoxFuture<'static, Result<Option<Vec<u8>>, String>>;

pub(crate) type Invoker<S> =
    Arc<dyn Fn(ErasedInstance, Vec<Vec<u8>>, Arc<S>) -> Invocation + Send + Sync>;

pub(crate) struct MethodEntry<S> {
    pub(crate) signature: MethodSignature,
    pub(crate) invoker: Invoker<S>,
}

/// Method table of interface `I`, filled by [`ServiceInterface::describe`].
pub struct MethodTable<I: ?Sized, S> {
    methods: HashMap<String, MethodEntry<S>>,
    _interface: PhantomData<fn(&I)>,
}

impl<I, S> MethodTable<I, S>
where
    I: ?Sized + Send + Sync + 'static,
    S: Serializer,
{
    pub(crate) fn new() -> Self {
        Self {
            methods: HashMap::new(),
            _interface: PhantomData,
        }
    }

    /// Register a synchronous method.
    pub fn method<A, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: Args,
        R: Serialize + Send + 'static,
        F: Fn(&I, A) -> Result<R, ServiceFault> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let invoker: Invoker<S> = Arc::new(
            move |instance: ErasedInstance, buffers: Vec<Vec<u8>>, serializer: Arc<S>| -> Invocation {
                let f = f.clone();
                Box::pin(async move {
                    let instance = downcast::<I>(&instance)
                        .ok_or_else(|| format!("listener is not a {}", type_name::<I>()))?;
                    let args = A::decode(&buffers, &*serializer).map_err(|e| e.to_string())?;
                    let value = f(&*instance, args).map_err(|fault| fault.message)?;
                    encode_return(&value, &*serializer)
                })
            },
        );
        self.insert::<A, R>(name, invoker)
    }

    /// Register a method whose implementation is asynchronous.
    pub fn async_method<A, R, F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: Args,
        R: Serialize + Send + 'static,
        F: Fn(Arc<I>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ServiceFault>> + Send + 'static,
    {
        let f = Arc::new(f);
        let invoker: Invoker<S> = Arc::new(
            move |instance: ErasedInstance, buffers: Vec<Vec<u8>>, serializer: Arc<S>| -> Invocation {
                let f = f.clone();
                Box::pin(async move {
                    let instance = downcast::<I>(&instance)
                        .ok_or_else(|| format!("listener is not a {}", type_name::<I>()))?;
                    let args = A::decode(&buffers, &*serializer).map_err(|e| e.to_string())?;
                    let value = f(instance, args).await.map_err(|fault| fault.message)?;
                    encode_return(&value, &*serializer)
                })
            },
        );
        self.insert::<A, R>(name, invoker)
    }

    fn insert<A: Args, R: 'static>(&mut self, name: &str, invoker: Invoker<S>) -> &mut Self {
        let signature = MethodSignature {
            name: name.to_string(),
            params: A::type_names(),
            returns: type_name::<R>(),
        };
        self.methods
            .insert(name.to_string(), MethodEntry { signature, invoker });
        self
    }

    pub fn signature(&self, name: &str) -> Option<&MethodSignature> {
        self.methods.get(name).map(|entry| &entry.signature)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub(crate) fn into_methods(self) -> HashMap<String, MethodEntry<S>> {
        self.methods
    }
}

pub(crate) fn downcast<I: ?Sized + 'static>(instance: &ErasedInstance) -> Option<Arc<I>> {
    (**instance).downcast_ref::<Arc<I>>().cloned()
}

/// Unit returns travel as an absent payload.
fn encode_return<R, S>(value: &R, serializer: &S) -> Result<Option<Vec<u8>>, String>
where
    R: Serialize + 'static,
    S: Serializer,
{
    if TypeId::of::<R>() == TypeId::of::<()>() {
        return Ok(None);
    }
    serializer
        .serialize(value, type_name::<R>())
        .map(Some)
        .map_err(|e| e.to_string())
}

/// An interface that can be registered as a listener or a proxy.
///
/// Implemented for the trait object type (`dyn Calculator`), usually by the
/// [`service!`](crate::service) macro.
pub trait ServiceInterface: Send + Sync + 'static {
    /// Service name used on the wire.
    const NAME: &'static str;

    fn describe<S: Serializer>(table: &mut MethodTable<Self, S>);
}

/// Supplies listener instances, per client context on the server and once
/// (with `None`) on the client.
pub trait DependencyResolver<I: ?Sized>: Send + Sync + 'static {
    fn resolve(&self, context: Option<&ClientContext>) -> Arc<I>;
}

impl<I, F> DependencyResolver<I> for F
where
    I: ?Sized,
    F: Fn(Option<&ClientContext>) -> Arc<I> + Send + Sync + 'static,
{
    fn resolve(&self, context: Option<&ClientContext>) -> Arc<I> {
        self(context)
    }
}

/// Resolver that hands every client the same instance.
pub struct SharedInstance<I: ?Sized>(Arc<I>);

impl<I: ?Sized> SharedInstance<I> {
    pub fn new(instance: Arc<I>) -> Self {
        Self(instance)
    }
}

impl<I: ?Sized + Send + Sync + 'static> DependencyResolver<I> for SharedInstance<I> {
    fn resolve(&self, _context: Option<&ClientContext>) -> Arc<I> {
        self.0.clone()
    }
}
