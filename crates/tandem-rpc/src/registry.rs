//! Service registry: static bindings plus listener instances per context.

use crate::error::{Result, RpcError};
use crate::service::{
    downcast, DependencyResolver, ErasedInstance, MethodEntry, MethodTable, ServiceInterface,
    ServiceRole,
};
use crate::serializer::Serializer;
use dashmap::DashMap;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tandem_transport::ClientContext;
use tracing::debug;

type InstanceFactory = Arc<dyn Fn(Option<&ClientContext>) -> ErasedInstance + Send + Sync>;

/// Registration of one interface in one role.
pub(crate) struct Binding<S> {
    name: &'static str,
    role: ServiceRole,
    interface: TypeId,
    interface_name: &'static str,
    methods: HashMap<String, MethodEntry<S>>,
    factory: Option<InstanceFactory>,
}

impl<S: Serializer> Binding<S> {
    pub(crate) fn proxy<I: ServiceInterface + ?Sized>() -> Self {
        Self::describe::<I>(ServiceRole::Proxy, None)
    }

    pub(crate) fn listener<I, R>(resolver: R) -> Self
    where
        I: ServiceInterface + ?Sized,
        R: DependencyResolver<I>,
    {
        let factory: InstanceFactory = Arc::new(move |context: Option<&ClientContext>| {
            let instance: Arc<I> = resolver.resolve(context);
            let erased: ErasedInstance = Arc::new(instance);
            erased
        });
        Self::describe::<I>(ServiceRole::Listener, Some(factory))
    }

    fn describe<I: ServiceInterface + ?Sized>(
        role: ServiceRole,
        factory: Option<InstanceFactory>,
    ) -> Self {
        let mut table = MethodTable::<I, S>::new();
        I::describe(&mut table);
        Self {
            name: I::NAME,
            role,
            interface: TypeId::of::<I>(),
            interface_name: type_name::<I>(),
            methods: table.into_methods(),
            factory,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn method(&self, method: &str) -> Result<&MethodEntry<S>> {
        self.methods
            .get(method)
            .ok_or_else(|| RpcError::MethodNotFound {
                service: self.name.to_string(),
                method: method.to_string(),
            })
    }

    fn check_interface<I: ?Sized + 'static>(&self) -> Result<()> {
        if self.interface == TypeId::of::<I>() {
            Ok(())
        } else {
            Err(RpcError::InvalidServiceType {
                name: self.name.to_string(),
                expected: type_name::<I>().to_string(),
            })
        }
    }
}

/// Listener instances resolved for one scope.
struct Container {
    instances: HashMap<&'static str, ErasedInstance>,
}

impl Container {
    fn resolve<S>(bindings: &HashMap<&'static str, Binding<S>>, context: Option<&ClientContext>) -> Self {
        let instances = bindings
            .values()
            .filter_map(|binding| {
                let factory = binding.factory.as_ref()?;
                Some((binding.name, factory(context)))
            })
            .collect();
        Self { instances }
    }
}

/// Bindings are fixed at construction. Listener instances live in one global
/// container on the client and one container per connected client on the
/// server, created and destroyed with the client's connection.
pub(crate) struct ServiceRegistry<S> {
    bindings: HashMap<&'static str, Binding<S>>,
    global: Option<Container>,
    clients: DashMap<ClientContext, Arc<Container>>,
}

impl<S: Serializer> ServiceRegistry<S> {
    /// Registry for a client: listeners are resolved once, with no context.
    pub(crate) fn for_client(bindings: HashMap<&'static str, Binding<S>>) -> Self {
        let global = Container::resolve(&bindings, None);
        Self {
            bindings,
            global: Some(global),
            clients: DashMap::new(),
        }
    }

    /// Registry for a server: listeners are resolved per attached client.
    pub(crate) fn for_server(bindings: HashMap<&'static str, Binding<S>>) -> Self {
        Self {
            bindings,
            global: None,
            clients: DashMap::new(),
        }
    }

    pub(crate) fn binding(&self, name: &str, role: ServiceRole) -> Result<&Binding<S>> {
        let binding = self
            .bindings
            .get(name)
            .ok_or_else(|| RpcError::ServiceNotFound(name.to_string()))?;
        if binding.role != role {
            return Err(RpcError::InvalidServiceType {
                name: name.to_string(),
                expected: role.to_string(),
            });
        }
        Ok(binding)
    }

    /// Binding of interface `I` in `role`, checked against its Rust type.
    pub(crate) fn typed_binding<I: ServiceInterface + ?Sized>(
        &self,
        role: ServiceRole,
    ) -> Result<&Binding<S>> {
        let binding = self.binding(I::NAME, role)?;
        binding.check_interface::<I>()?;
        Ok(binding)
    }

    /// The listener instance answering calls to `name` from `context`.
    pub(crate) fn instance(
        &self,
        name: &str,
        context: Option<&ClientContext>,
    ) -> Result<ErasedInstance> {
        let lookup = |container: &Container| {
            container
                .instances
                .get(name)
                .cloned()
                .ok_or_else(|| RpcError::ServiceNotFound(name.to_string()))
        };
        match (context, &self.global) {
            (None, Some(global)) => lookup(global),
            (None, None) => Err(RpcError::ContextRequired),
            (Some(context), _) => match self.clients.get(context) {
                Some(container) => lookup(container.value().as_ref()),
                None => match &self.global {
                    Some(global) => lookup(global),
                    None => Err(RpcError::UnknownClientContext(context.clone())),
                },
            },
        }
    }

    pub(crate) fn listener<I: ServiceInterface + ?Sized>(
        &self,
        context: Option<&ClientContext>,
    ) -> Result<Arc<I>> {
        let binding = self.typed_binding::<I>(ServiceRole::Listener)?;
        let instance = self.instance(binding.name, context)?;
        downcast::<I>(&instance).ok_or_else(|| RpcError::InvalidServiceType {
            name: binding.name.to_string(),
            expected: binding.interface_name.to_string(),
        })
    }

    /// Resolve a fresh container for `context`.
    pub(crate) fn attach_client(&self, context: &ClientContext) {
        let container = Container::resolve(&self.bindings, Some(context));
        debug!(client = %context, listeners = container.instances.len(), "listeners resolved");
        self.clients.insert(context.clone(), Arc::new(container));
    }

    /// Drop the container of `context`. Returns false if none was attached.
    pub(crate) fn detach_client(&self, context: &ClientContext) -> bool {
        self.clients.remove(context).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;
    use crate::service::{MethodTable, ServiceFault, SharedInstance};
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync + 'static {
        fn get(&self) -> std::result::Result<usize, ServiceFault>;
    }

    struct Fixed(usize);

    impl Counter for Fixed {
        fn get(&self) -> std::result::Result<usize, ServiceFault> {
            Ok(self.0)
        }
    }

    impl ServiceInterface for dyn Counter {
        const NAME: &'static str = "Counter";

        fn describe<S: Serializer>(table: &mut MethodTable<Self, S>) {
            table.method("Get", |this, (): ()| this.get());
        }
    }

    trait Other: Send + Sync + 'static {}

    impl ServiceInterface for dyn Other {
        const NAME: &'static str = "Counter";

        fn describe<S: Serializer>(_table: &mut MethodTable<Self, S>) {}
    }

    fn bindings(
        binding: Binding<JsonSerializer>,
    ) -> HashMap<&'static str, Binding<JsonSerializer>> {
        HashMap::from([(binding.name(), binding)])
    }

    #[test]
    fn test_lookup_errors() {
        let registry = ServiceRegistry::for_client(bindings(Binding::proxy::<dyn Counter>()));

        assert!(matches!(
            registry.binding("Nope", ServiceRole::Proxy),
            Err(RpcError::ServiceNotFound(ref n)) if n == "Nope"
        ));
        assert!(matches!(
            registry.binding("Counter", ServiceRole::Listener),
            Err(RpcError::InvalidServiceType { .. })
        ));
        assert!(matches!(
            registry.typed_binding::<dyn Other>(ServiceRole::Proxy),
            Err(RpcError::InvalidServiceType { .. })
        ));

        let binding = registry.binding("Counter", ServiceRole::Proxy).unwrap();
        assert!(binding.method("Get").is_ok());
        assert!(matches!(
            binding.method("Set"),
            Err(RpcError::MethodNotFound { ref method, .. }) if method == "Set"
        ));
    }

    #[test]
    fn test_client_listeners_resolve_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let resolver = move |context: Option<&ClientContext>| -> Arc<dyn Counter> {
            assert!(context.is_none());
            seen.fetch_add(1, Ordering::SeqCst);
            Arc::new(Fixed(1))
        };
        let registry = ServiceRegistry::for_client(bindings(Binding::listener::<dyn Counter, _>(resolver)));

        let a = registry.listener::<dyn Counter>(None).unwrap();
        let b = registry.listener::<dyn Counter>(None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_server_containers_follow_client_lifecycle() {
        let next = Arc::new(AtomicUsize::new(0));
        let resolver = move |context: Option<&ClientContext>| -> Arc<dyn Counter> {
            assert!(context.is_some());
            Arc::new(Fixed(next.fetch_add(1, Ordering::SeqCst)))
        };
        let registry = ServiceRegistry::for_server(bindings(Binding::listener::<dyn Counter, _>(resolver)));

        assert!(matches!(
            registry.listener::<dyn Counter>(None),
            Err(RpcError::ContextRequired)
        ));

        let first = ClientContext::new();
        let second = ClientContext::new();
        assert!(matches!(
            registry.listener::<dyn Counter>(Some(&first)),
            Err(RpcError::UnknownClientContext(_))
        ));

        registry.attach_client(&first);
        registry.attach_client(&second);
        let a = registry.listener::<dyn Counter>(Some(&first)).unwrap();
        let b = registry.listener::<dyn Counter>(Some(&second)).unwrap();
        assert_ne!(a.get().unwrap(), b.get().unwrap());

        assert!(registry.detach_client(&first));
        assert!(!registry.detach_client(&first));
        assert!(registry.listener::<dyn Counter>(Some(&first)).is_err());
        assert!(registry.listener::<dyn Counter>(Some(&second)).is_ok());
    }

    #[test]
    fn test_shared_instance_is_reused_across_clients() {
        let shared: Arc<dyn Counter> = Arc::new(Fixed(7));
        let registry = ServiceRegistry::for_server(bindings(Binding::listener::<dyn Counter, _>(
            SharedInstance::new(shared.clone()),
        )));
        let context = ClientContext::new();
        registry.attach_client(&context);
        let resolved = registry.listener::<dyn Counter>(Some(&context)).unwrap();
        assert!(Arc::ptr_eq(&resolved, &shared));
    }
}
