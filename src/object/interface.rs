//! Interface declarations: the method, signal and property tables an
//! exported object answers with.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::protocol::introspect::{ArgInfo, InterfaceInfo, MethodInfo, PropertyAccess, PropertyInfo, SignalInfo};
use crate::protocol::names::{check_interface_name, check_member_name};
use crate::protocol::{
    BodyType, DBusError, FromBody, FromValue, IntoBody, ObjectPath, Result, Signature,
    SignatureType, Type, Value, Variant,
};

use super::CallContext;

/// Outcome of one method invocation: the reply body or a named error.
pub type MethodResult = std::result::Result<Vec<Value>, DBusError>;

pub(crate) type MethodFn<T> = dyn Fn(&T, &CallContext, Vec<Value>) -> MethodResult + Send + Sync;
type GetterFn<T> = dyn Fn(&T) -> std::result::Result<Value, DBusError> + Send + Sync;
type SetterFn<T> = dyn Fn(&T, Value) -> std::result::Result<(), DBusError> + Send + Sync;

/// What a method hands back: nothing, one value, or several via [`Outputs`].
pub trait ReturnValue {
    /// Wire types of the reply body.
    fn output_types() -> Vec<SignatureType>;
    /// Reply body.
    fn into_values(self) -> Vec<Value>;
}

impl ReturnValue for () {
    fn output_types() -> Vec<SignatureType> {
        Vec::new()
    }

    fn into_values(self) -> Vec<Value> {
        Vec::new()
    }
}

macro_rules! single_return {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ReturnValue for $ty {
                fn output_types() -> Vec<SignatureType> {
                    vec![<$ty as Type>::signature_type()]
                }

                fn into_values(self) -> Vec<Value> {
                    vec![self.into()]
                }
            }
        )*
    };
}

single_return!(u8, bool, i16, u16, i32, u32, i64, u64, f64, String, ObjectPath, Signature, Variant);

impl<T: Type + Into<Value>> ReturnValue for Vec<T> {
    fn output_types() -> Vec<SignatureType> {
        vec![<Self as Type>::signature_type()]
    }

    fn into_values(self) -> Vec<Value> {
        vec![self.into()]
    }
}

impl<K, V, S> ReturnValue for HashMap<K, V, S>
where
    K: Type + Into<Value> + Eq + Hash,
    V: Type + Into<Value>,
    S: std::hash::BuildHasher,
{
    fn output_types() -> Vec<SignatureType> {
        vec![<Self as Type>::signature_type()]
    }

    fn into_values(self) -> Vec<Value> {
        vec![self.into()]
    }
}

/// Several out-arguments, e.g. `Outputs((1u32, "x".to_owned()))` for `us`.
#[derive(Debug, Clone, PartialEq)]
pub struct Outputs<T>(pub T);

impl<T: IntoBody + BodyType> ReturnValue for Outputs<T> {
    fn output_types() -> Vec<SignatureType> {
        T::body_types()
    }

    fn into_values(self) -> Vec<Value> {
        self.0.into_body()
    }
}

pub(crate) struct Method<T> {
    pub(crate) signature: String,
    pub(crate) handler: Arc<MethodFn<T>>,
}

struct Property<T> {
    info: PropertyInfo,
    getter: Option<Arc<GetterFn<T>>>,
    setter: Option<Arc<SetterFn<T>>>,
}

fn args(types: Vec<SignatureType>) -> Vec<ArgInfo> {
    types
        .into_iter()
        .map(|ty| ArgInfo::new("", Signature::from_types(&[ty])))
        .collect()
}

fn split_signature(signature: &Signature) -> Vec<ArgInfo> {
    signature.types().map(args).unwrap_or_default()
}

/// One interface implemented by objects of type `T`.
///
/// ```
/// use dbuslink::object::Interface;
///
/// struct Greeter;
///
/// let iface = Interface::<Greeter>::new("org.example.Greeter")
///     .unwrap()
///     .method("Hello", |_obj, _ctx, (name,): (String,)| Ok(format!("hello {name}")))
///     .property("Version", |_obj| 3u32);
/// assert_eq!(iface.name(), "org.example.Greeter");
/// ```
pub struct Interface<T> {
    info: InterfaceInfo,
    methods: HashMap<String, Vec<Method<T>>>,
    properties: Vec<Property<T>>,
}

impl<T> std::fmt::Debug for Interface<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface").field("info", &self.info).finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Interface<T> {
    /// Empty interface named `name`.
    pub fn new(name: &str) -> Result<Self> {
        check_interface_name(name)?;
        Ok(Self {
            info: InterfaceInfo {
                name: name.to_owned(),
                ..InterfaceInfo::default()
            },
            methods: HashMap::new(),
            properties: Vec::new(),
        })
    }

    /// Interface name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Introspection description.
    #[must_use]
    pub fn info(&self) -> &InterfaceInfo {
        &self.info
    }

    /// Typed method: arguments arrive as a tuple, the result is sent back as the reply.
    #[must_use]
    pub fn method<A, R, F>(self, name: &str, handler: F) -> Self
    where
        A: FromBody + BodyType,
        R: ReturnValue,
        F: Fn(&T, &CallContext, A) -> std::result::Result<R, DBusError> + Send + Sync + 'static,
    {
        let inputs = A::body_signature();
        let outputs = Signature::from_types(&R::output_types());
        self.method_raw(name, inputs, outputs, move |obj, ctx, values| {
            let args = A::from_body(values).map_err(|err| DBusError::invalid_args(err.to_string()))?;
            handler(obj, ctx, args).map(ReturnValue::into_values)
        })
    }

    /// Method over untyped values with explicit signatures.
    #[must_use]
    pub fn method_raw<F>(mut self, name: &str, inputs: Signature, outputs: Signature, handler: F) -> Self
    where
        F: Fn(&T, &CallContext, Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        self.info.methods.push(MethodInfo {
            name: name.to_owned(),
            inputs: split_signature(&inputs),
            outputs: split_signature(&outputs),
        });
        self.methods.entry(name.to_owned()).or_default().push(Method {
            signature: inputs.as_str().to_owned(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Declare a signal this interface emits, for introspection.
    #[must_use]
    pub fn signal<A: BodyType>(self, name: &str) -> Self {
        self.signal_raw(name, A::body_signature())
    }

    /// Declare a signal with an explicit signature.
    #[must_use]
    pub fn signal_raw(mut self, name: &str, signature: Signature) -> Self {
        self.info.signals.push(SignalInfo {
            name: name.to_owned(),
            args: split_signature(&signature),
        });
        self
    }

    /// Read-only property.
    #[must_use]
    pub fn property<V, G>(self, name: &str, getter: G) -> Self
    where
        V: Type + Into<Value>,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.push_property(
            name,
            V::signature(),
            PropertyAccess::Read,
            Some(Arc::new(move |obj: &T| Ok(getter(obj).into()))),
            None,
        )
    }

    /// Read-write property; the setter may refuse a value.
    #[must_use]
    pub fn property_rw<V, G, S>(self, name: &str, getter: G, setter: S) -> Self
    where
        V: Type + Into<Value> + FromValue,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&T, V) -> std::result::Result<(), DBusError> + Send + Sync + 'static,
    {
        self.push_property(
            name,
            V::signature(),
            PropertyAccess::ReadWrite,
            Some(Arc::new(move |obj: &T| Ok(getter(obj).into()))),
            Some(Arc::new(move |obj: &T, value: Value| {
                let typed = V::from_value(value).map_err(|err| DBusError::invalid_args(err.to_string()))?;
                setter(obj, typed)
            })),
        )
    }

    /// Write-only property.
    #[must_use]
    pub fn property_write_only<V, S>(self, name: &str, setter: S) -> Self
    where
        V: Type + FromValue,
        S: Fn(&T, V) -> std::result::Result<(), DBusError> + Send + Sync + 'static,
    {
        self.push_property(
            name,
            V::signature(),
            PropertyAccess::Write,
            None,
            Some(Arc::new(move |obj: &T, value: Value| {
                let typed = V::from_value(value).map_err(|err| DBusError::invalid_args(err.to_string()))?;
                setter(obj, typed)
            })),
        )
    }

    fn push_property(
        mut self,
        name: &str,
        signature: Signature,
        access: PropertyAccess,
        getter: Option<Arc<GetterFn<T>>>,
        setter: Option<Arc<SetterFn<T>>>,
    ) -> Self {
        let info = PropertyInfo {
            name: name.to_owned(),
            signature,
            access,
        };
        self.info.properties.push(info.clone());
        self.properties.push(Property { info, getter, setter });
        self
    }

    /// Check every declared member name.
    pub(crate) fn validate(&self) -> Result<()> {
        for method in &self.info.methods {
            check_member_name(&method.name)?;
        }
        for signal in &self.info.signals {
            check_member_name(&signal.name)?;
        }
        for property in &self.info.properties {
            check_member_name(&property.name)?;
        }
        Ok(())
    }

    pub(crate) fn has_member(&self, member: &str) -> bool {
        self.methods.contains_key(member)
    }

    pub(crate) fn find_method(&self, member: &str, signature: &str) -> Option<&Method<T>> {
        self.methods.get(member)?.iter().find(|m| m.signature == signature)
    }

    pub(crate) fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.info.name == name)
    }

    /// `None` when the property is not declared here.
    pub(crate) fn get_property(&self, obj: &T, name: &str) -> Option<std::result::Result<Value, DBusError>> {
        let property = self.properties.iter().find(|p| p.info.name == name)?;
        Some(match &property.getter {
            Some(getter) => getter(obj),
            None => Err(DBusError::new(
                crate::protocol::error_names::ACCESS_DENIED,
                format!("property {name} is write-only"),
            )),
        })
    }

    /// `None` when the property is not declared here.
    pub(crate) fn set_property(
        &self,
        obj: &T,
        name: &str,
        value: Value,
    ) -> Option<std::result::Result<(), DBusError>> {
        let property = self.properties.iter().find(|p| p.info.name == name)?;
        Some(match &property.setter {
            Some(setter) => {
                let found = value.signature_type().to_string();
                if found == property.info.signature.as_str() {
                    setter(obj, value)
                } else {
                    Err(DBusError::invalid_args(format!(
                        "property {name} has type {}, got {found}",
                        property.info.signature
                    )))
                }
            }
            None => Err(DBusError::property_read_only(format!(
                "property {name} is read-only"
            ))),
        })
    }

    /// Every readable property with its current value.
    pub(crate) fn get_all(&self, obj: &T) -> std::result::Result<Vec<(String, Value)>, DBusError> {
        self.properties
            .iter()
            .filter_map(|p| p.getter.as_ref().map(|getter| (p.info.name.clone(), getter)))
            .map(|(name, getter)| getter(obj).map(|value| (name, value)))
            .collect()
    }
}
