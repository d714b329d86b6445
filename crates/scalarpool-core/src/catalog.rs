//! Function catalog: which SQL functions are exposed, how their arguments are
//! encoded into SQL text, and how their scalar results are decoded.
//!
//! Encoders and decoders are looked up by name, so catalogs can be declared in
//! YAML:
//!
//! ```yaml
//! namespace: http://postgis.net/function/
//! functions:
//!   azimuth:
//!     function: ST_Azimuth
//!     arguments: [geography, geography]
//!     datatype: xsd:float
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, EvalError, Result};
use crate::types::Scalar;

pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
pub const POSTGIS_NAMESPACE: &str = "http://postgis.net/function/";

/// An input term handed to a catalog function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub value: String,
    #[serde(default)]
    pub datatype: Option<String>,
}

impl Literal {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            datatype: None,
        }
    }
}

/// A decoded result term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedLiteral {
    #[serde(rename = "type")]
    pub term_type: String,
    pub value: String,
    pub datatype: String,
}

impl TypedLiteral {
    fn xsd(local: &str, value: String) -> Self {
        Self {
            term_type: "literal".into(),
            value,
            datatype: format!("{XSD}{local}"),
        }
    }
}

pub type ArgEncoder = fn(&Literal) -> Result<String>;
pub type ResultDecoder = fn(&Scalar) -> std::result::Result<TypedLiteral, EvalError>;

/// Declarative description of one exposed function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    /// SQL function name, e.g. `ST_Azimuth`.
    pub function: String,
    /// Encoder name per positional argument.
    pub arguments: Vec<String>,
    /// Decoder name for the result.
    pub datatype: String,
}

/// A [`FunctionDef`] with its encoders and decoder resolved.
#[derive(Clone)]
pub struct Function {
    def: FunctionDef,
    encoders: Vec<ArgEncoder>,
    decoder: ResultDecoder,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function").field("def", &self.def).finish()
    }
}

impl Function {
    pub fn resolve(def: FunctionDef) -> Result<Self> {
        let encoders = def
            .arguments
            .iter()
            .map(|name| {
                encoder(name)
                    .ok_or_else(|| Error::Catalog(format!("unknown argument type '{name}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        let decoder = decoder(&def.datatype)
            .ok_or_else(|| Error::Catalog(format!("unknown result type '{}'", def.datatype)))?;
        Ok(Self {
            def,
            encoders,
            decoder,
        })
    }

    pub fn def(&self) -> &FunctionDef {
        &self.def
    }

    pub fn arity(&self) -> usize {
        self.encoders.len()
    }

    /// SQL call text for `args`, e.g. `ST_Azimuth(ST_GeogFromText('POINT(0 0)'),...)`.
    pub fn expression(&self, args: &[Literal]) -> Result<String> {
        if args.len() != self.arity() {
            return Err(Error::Catalog(format!(
                "{} expects {} argument(s), got {}",
                self.def.function,
                self.arity(),
                args.len()
            )));
        }
        let encoded = self
            .encoders
            .iter()
            .zip(args)
            .map(|(encode, arg)| encode(arg))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("{}({})", self.def.function, encoded.join(",")))
    }

    pub fn decode(&self, value: &Scalar) -> std::result::Result<TypedLiteral, EvalError> {
        (self.decoder)(value)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogDoc {
    namespace: String,
    #[serde(default)]
    functions: BTreeMap<String, FunctionDef>,
}

/// Named functions under one namespace.
#[derive(Debug, Clone)]
pub struct Catalog {
    namespace: String,
    functions: BTreeMap<String, Function>,
}

impl Catalog {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            functions: BTreeMap::new(),
        }
    }

    /// The PostGIS functions shipped by default.
    pub fn postgis() -> Self {
        let mut catalog = Self::new(POSTGIS_NAMESPACE);
        catalog.functions.insert(
            "azimuth".into(),
            Function {
                def: FunctionDef {
                    function: "ST_Azimuth".into(),
                    arguments: vec!["geography".into(), "geography".into()],
                    datatype: "xsd:float".into(),
                },
                encoders: vec![encode_geography as ArgEncoder, encode_geography],
                decoder: decode_xsd_float,
            },
        );
        catalog
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let doc: CatalogDoc = serde_yaml::from_str(text)?;
        let mut catalog = Self::new(doc.namespace);
        for (name, def) in doc.functions {
            catalog.register(name, def)?;
        }
        Ok(catalog)
    }

    pub fn register(&mut self, name: impl Into<String>, def: FunctionDef) -> Result<()> {
        let function = Function::resolve(def)?;
        self.functions.insert(name.into(), function);
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Full IRI of a function name under this namespace.
    pub fn iri(&self, name: &str) -> String {
        format!("{}{}", self.namespace, name)
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn expression(&self, name: &str, args: &[Literal]) -> Result<String> {
        self.lookup(name)?.expression(args)
    }

    pub fn lookup(&self, name: &str) -> Result<&Function> {
        self.get(name)
            .ok_or_else(|| Error::Catalog(format!("unknown function '{name}'")))
    }
}

pub fn encoder(name: &str) -> Option<ArgEncoder> {
    let f: ArgEncoder = match name {
        "geography" => encode_geography,
        "geometry" => encode_geometry,
        "float" => encode_float,
        "integer" => encode_integer,
        "text" => encode_text,
        _ => return None,
    };
    Some(f)
}

pub fn decoder(name: &str) -> Option<ResultDecoder> {
    let local = name
        .strip_prefix("xsd:")
        .or_else(|| name.strip_prefix(XSD))?;
    let f: ResultDecoder = match local {
        "float" => decode_xsd_float,
        "double" => decode_xsd_double,
        "integer" => decode_xsd_integer,
        "boolean" => decode_xsd_boolean,
        "string" => decode_xsd_string,
        _ => return None,
    };
    Some(f)
}

// --- argument encoders ---

fn encode_geography(lit: &Literal) -> Result<String> {
    Ok(format!("ST_GeogFromText('{}')", lit.value.replace('\'', "")))
}

fn encode_geometry(lit: &Literal) -> Result<String> {
    Ok(format!("ST_GeomFromText('{}')", lit.value.replace('\'', "")))
}

fn encode_float(lit: &Literal) -> Result<String> {
    let v = lit.value.trim();
    match v.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(v.to_string()),
        _ => Err(Error::Catalog(format!("'{}' is not a finite number", lit.value))),
    }
}

fn encode_integer(lit: &Literal) -> Result<String> {
    let v = lit.value.trim();
    v.parse::<i64>()
        .map(|i| i.to_string())
        .map_err(|_| Error::Catalog(format!("'{}' is not an integer", lit.value)))
}

fn encode_text(lit: &Literal) -> Result<String> {
    Ok(format!("'{}'", lit.value.replace('\'', "''")))
}

// --- result decoders ---

fn numeric(value: &Scalar, local: &str) -> std::result::Result<TypedLiteral, EvalError> {
    match value {
        Scalar::Int(_) | Scalar::Float(_) => Ok(TypedLiteral::xsd(local, value.to_string())),
        Scalar::Text(s) if s.trim().parse::<f64>().is_ok() => {
            Ok(TypedLiteral::xsd(local, s.trim().to_string()))
        }
        other => Err(EvalError::Decode(format!("expected xsd:{local}, got {other:?}"))),
    }
}

fn decode_xsd_float(value: &Scalar) -> std::result::Result<TypedLiteral, EvalError> {
    numeric(value, "float")
}

fn decode_xsd_double(value: &Scalar) -> std::result::Result<TypedLiteral, EvalError> {
    numeric(value, "double")
}

fn decode_xsd_integer(value: &Scalar) -> std::result::Result<TypedLiteral, EvalError> {
    match value {
        Scalar::Int(i) => Ok(TypedLiteral::xsd("integer", i.to_string())),
        other => Err(EvalError::Decode(format!("expected xsd:integer, got {other:?}"))),
    }
}

fn decode_xsd_boolean(value: &Scalar) -> std::result::Result<TypedLiteral, EvalError> {
    match value {
        Scalar::Bool(b) => Ok(TypedLiteral::xsd("boolean", b.to_string())),
        other => Err(EvalError::Decode(format!("expected xsd:boolean, got {other:?}"))),
    }
}

fn decode_xsd_string(value: &Scalar) -> std::result::Result<TypedLiteral, EvalError> {
    match value {
        Scalar::Null => Err(EvalError::Decode("expected xsd:string, got NULL".into())),
        other => Ok(TypedLiteral::xsd("string", other.to_string())),
    }
}
