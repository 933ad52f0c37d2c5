//! Canonical display forms for types: `uint256`, `bytes4`,
//! `mapping<address,uint256>`, `array<uint8,3>`.

use std::fmt;

use crate::ty::Ty;

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int { signed: false, bits } => write!(f, "uint{bits}"),
            Ty::Int { signed: true, bits } => write!(f, "int{bits}"),
            Ty::Address => write!(f, "address"),
            Ty::Bool => write!(f, "bool"),
            Ty::Bytes { size: Some(size) } => write!(f, "bytes{size}"),
            Ty::Bytes { size: None } => write!(f, "bytes"),
            Ty::String => write!(f, "string"),
            Ty::Array { element, size: Some(size) } => write!(f, "array<{element},{size}>"),
            Ty::Array { element, size: None } => write!(f, "array<{element}>"),
            Ty::Mapping { key, value } => write!(f, "mapping<{key},{value}>"),
            Ty::Struct(def) => write!(f, "{}", def.name),
            Ty::Function { params, returns } => {
                write!(f, "function(")?;
                for (index, param) in params.iter().enumerate() {
                    if index > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ")")?;
                if let Some(returns) = returns {
                    write!(f, " returns {returns}")?;
                }
                Ok(())
            }
            Ty::Failure(reason) => write!(f, "failure({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::ty::{StructField, StructTy, Ty};

    #[test]
    fn canonical_forms() {
        assert_eq!(Ty::UINT256.to_string(), "uint256");
        assert_eq!(Ty::Bytes { size: Some(4) }.to_string(), "bytes4");
        assert_eq!(
            Ty::Mapping { key: Box::new(Ty::Address), value: Box::new(Ty::UINT256) }.to_string(),
            "mapping<address,uint256>"
        );
        assert_eq!(
            Ty::Array { element: Box::new(Ty::uint(8)), size: Some(3) }.to_string(),
            "array<uint8,3>"
        );
        assert_eq!(
            Ty::Struct(StructTy { name: "Point".to_string(), fields: Arc::new(vec![]) })
                .to_string(),
            "Point"
        );
        assert_eq!(
            Ty::Function { params: vec![Ty::UINT256], returns: Some(Box::new(Ty::Bool)) }
                .to_string(),
            "function(uint256) returns bool"
        );
        let _ = StructField { name: "x".to_string(), ty: Ty::Bool, offset: 0 };
    }
}
