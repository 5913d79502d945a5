//! The `service!` macro.

/// Declare a service interface and its typed proxy.
///
/// ```rust,ignore
/// tandem_rpc::service! {
///     /// Arithmetic on the server.
///     pub trait Calculator as "Calculator" {
///         fn sum(&self, number1: i32, number2: i32) -> i32 as "Sum";
///         fn reset(&self) -> ();
///     }
///     pub proxy CalculatorProxy;
/// }
/// ```
///
/// This expands to:
/// - the trait, whose methods return `Result<T, ServiceFault>`;
/// - `impl ServiceInterface for dyn Calculator`, with wire name
///   `"Calculator"` and one table entry per method, named by its `as` literal
///   or, without one, by the Rust method name;
/// - `CalculatorProxy<S = JsonSerializer>`, whose async methods call the
///   peer and return `tandem_rpc::Result<T>`.
///
/// Argument and return types must be owned serde types.
#[macro_export]
macro_rules! service {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident as $wire:literal {
            $(
                $(#[$mmeta:meta])*
                fn $method:ident(&self $(, $arg:ident : $ty:ty)* $(,)?) -> $ret:ty $(as $mwire:literal)?;
            )*
        }
        $pvis:vis proxy $proxy:ident;
    ) => {
        $(#[$meta])*
        $vis trait $name: ::std::marker::Send + ::std::marker::Sync + 'static {
            $(
                $(#[$mmeta])*
                fn $method(&self $(, $arg: $ty)*) -> ::std::result::Result<$ret, $crate::ServiceFault>;
            )*
        }

        impl $crate::ServiceInterface for dyn $name {
            const NAME: &'static str = $wire;

            fn describe<__S: $crate::Serializer>(table: &mut $crate::MethodTable<Self, __S>) {
                $(
                    table.method(
                        $crate::__service_method_name!($method $(, $mwire)?),
                        |this, ($($arg,)*): ($($ty,)*)| this.$method($($arg),*),
                    );
                )*
            }
        }

        #[doc = concat!("Calls `", $wire, "` on the peer.")]
        $pvis struct $proxy<__S: $crate::Serializer = $crate::JsonSerializer> {
            caller: $crate::ServiceCaller<__S>,
        }

        impl<__S: $crate::Serializer> ::std::clone::Clone for $proxy<__S> {
            fn clone(&self) -> Self {
                Self {
                    caller: self.caller.clone(),
                }
            }
        }

        impl<__S: $crate::Serializer> $crate::Proxy<__S> for $proxy<__S> {
            type Interface = dyn $name;

            fn from_caller(caller: $crate::ServiceCaller<__S>) -> Self {
                Self { caller }
            }
        }

        impl<__S: $crate::Serializer> $proxy<__S> {
            $(
                $(#[$mmeta])*
                pub async fn $method(&self $(, $arg: $ty)*) -> $crate::Result<$ret> {
                    self.caller
                        .call::<_, $ret>(
                            $crate::__service_method_name!($method $(, $mwire)?),
                            ($($arg,)*),
                        )
                        .await
                }
            )*

            pub fn caller(&self) -> &$crate::ServiceCaller<__S> {
                &self.caller
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __service_method_name {
    ($method:ident) => {
        stringify!($method)
    };
    ($method:ident, $wire:literal) => {
        $wire
    };
}

#[cfg(test)]
mod tests {
    use crate::mediator::{Mediator, Side};
    use crate::registry::{Binding, ServiceRegistry};
    use crate::{
        JsonSerializer, MethodTable, Proxy, RpcError, ServiceCaller, ServiceFault, ServiceInterface,
        SharedInstance,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, OnceLock, Weak};
    use tandem_protocol::RpcMessage;
    use tandem_transport::{ClientContext, ClientEventHandler, OutboundLink};

    crate::service! {
        /// Test interface.
        pub trait Shelf as "Shelf" {
            fn put(&self, key: String, value: u32) -> () as "Put";
            fn get(&self, key: String) -> Option<u32> as "Get";
            fn count(&self) -> usize;
        }
        pub proxy ShelfProxy;
    }

    struct Empty;

    impl Shelf for Empty {
        fn put(&self, _key: String, _value: u32) -> Result<(), ServiceFault> {
            Err("read only".into())
        }

        fn get(&self, _key: String) -> Result<Option<u32>, ServiceFault> {
            Ok(None)
        }

        fn count(&self) -> Result<usize, ServiceFault> {
            Ok(0)
        }
    }

    #[test]
    fn test_generated_table() {
        let mut table = MethodTable::<dyn Shelf, JsonSerializer>::new();
        <dyn Shelf as ServiceInterface>::describe(&mut table);

        assert_eq!(<dyn Shelf as ServiceInterface>::NAME, "Shelf");
        assert_eq!(table.len(), 3);
        assert_eq!(table.signature("Put").unwrap().arity(), 2);
        assert_eq!(table.signature("Get").unwrap().arity(), 1);
        assert_eq!(table.signature("count").unwrap().arity(), 0);
        assert!(table.signature("put").is_none());

        let shelf: &dyn Shelf = &Empty;
        assert_eq!(shelf.count().unwrap(), 0);
        assert_eq!(shelf.get("a".into()).unwrap(), None);
        assert_eq!(shelf.put("a".into(), 1).unwrap_err().message(), "read only");
    }

    /// Hands every outgoing message straight to the peer mediator.
    #[derive(Default)]
    struct Loopback {
        peer: OnceLock<Weak<Mediator<JsonSerializer>>>,
    }

    #[async_trait]
    impl OutboundLink for Loopback {
        async fn send_to(
            &self,
            message: RpcMessage,
            _context: Option<&ClientContext>,
        ) -> tandem_transport::Result<()> {
            if let Some(peer) = self.peer.get().and_then(Weak::upgrade) {
                ClientEventHandler::on_message(&*peer, message).await;
            }
            Ok(())
        }
    }

    fn mediator(binding: Binding<JsonSerializer>, link: Arc<Loopback>) -> Arc<Mediator<JsonSerializer>> {
        let registry = ServiceRegistry::for_client(HashMap::from([(binding.name(), binding)]));
        Arc::new(Mediator::new(Side::Client, Arc::new(JsonSerializer), registry, link))
    }

    #[tokio::test]
    async fn test_generated_proxy_calls_generated_table() {
        let caller_link = Arc::new(Loopback::default());
        let callee_link = Arc::new(Loopback::default());
        let caller = mediator(Binding::proxy::<dyn Shelf>(), caller_link.clone());
        let empty: Arc<dyn Shelf> = Arc::new(Empty);
        let callee = mediator(
            Binding::listener::<dyn Shelf, _>(SharedInstance::new(empty)),
            callee_link.clone(),
        );
        let _ = caller_link.peer.set(Arc::downgrade(&callee));
        let _ = callee_link.peer.set(Arc::downgrade(&caller));

        let shelf = ShelfProxy::from_caller(ServiceCaller::new(caller.clone(), "Shelf", None));
        assert_eq!(shelf.caller().service(), "Shelf");
        assert_eq!(shelf.count().await.unwrap(), 0);
        assert_eq!(shelf.clone().get("a".into()).await.unwrap(), None);

        let err = shelf.put("a".into(), 1).await.unwrap_err();
        assert!(matches!(err, RpcError::Remote(ref fault) if fault.error_text == "read only"));
        assert_eq!(caller.pending_calls(None), 0);
    }
}
