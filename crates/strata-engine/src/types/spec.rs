//! Textual type specs such as `int`, `Value<int>` or `Map<string, Collection<float>>`

use super::{ElementType, ModelInstanceType, ModelType};

/// Parse an element type spec
pub fn parse_element_type(spec: &str) -> Result<ElementType, String> {
    let mut reader = SpecReader::new(spec);
    let ty = reader.element_type()?;
    reader.finish()?;
    Ok(ty)
}

/// Parse a spec that must name a model type, e.g. `Collection<int>`
pub fn parse_model_type(spec: &str) -> Result<ModelInstanceType, String> {
    match parse_element_type(spec)? {
        ElementType::Model(inner) => Ok(*inner),
        other => Err(format!("'{}' is not a model type", other)),
    }
}

struct SpecReader<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> SpecReader<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.text[self.pos..].chars().next() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.text[self.pos..].chars().next()
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(c) => Err(format!("expected '{}', found '{}'", expected, c)),
            None => Err(format!("expected '{}', found end of type", expected)),
        }
    }

    fn name(&mut self) -> Result<&'a str, String> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(c) = self.text[self.pos..].chars().next() {
            if !(c.is_alphanumeric() || c == '_' || c == '?') {
                break;
            }
            self.pos += c.len_utf8();
        }
        if start == self.pos {
            return Err("expected a type name".to_string());
        }
        Ok(&self.text[start..self.pos])
    }

    fn element_type(&mut self) -> Result<ElementType, String> {
        let name = self.name()?;
        let scalar = match name {
            "?" => Some(ElementType::Unknown),
            "any" => Some(ElementType::Any),
            "void" => Some(ElementType::Void),
            "bool" | "boolean" => Some(ElementType::Bool),
            "int" | "long" => Some(ElementType::Int),
            "float" | "double" => Some(ElementType::Float),
            "string" | "text" => Some(ElementType::Text),
            _ => None,
        };
        if let Some(scalar) = scalar {
            return Ok(scalar);
        }
        let model = ModelType::from_name(name).ok_or_else(|| format!("unknown type '{}'", name))?;
        let mut args = Vec::new();
        if self.peek() == Some('<') {
            self.expect('<')?;
            loop {
                args.push(self.element_type()?);
                match self.peek() {
                    Some(',') => self.expect(',')?,
                    _ => break,
                }
            }
            self.expect('>')?;
        }
        ModelInstanceType::new(model, args).map(ElementType::model)
    }

    fn finish(&mut self) -> Result<(), String> {
        match self.peek() {
            None => Ok(()),
            Some(c) => Err(format!("unexpected '{}'", c)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(parse_element_type("int"), Ok(ElementType::Int));
        assert_eq!(parse_element_type(" string "), Ok(ElementType::Text));
        assert_eq!(parse_element_type("?"), Ok(ElementType::Unknown));
    }

    #[test]
    fn test_nested_model_types() {
        let ty = parse_model_type("Map<string, Collection<Value<int>>>").unwrap();
        assert_eq!(ty.model, ModelType::Map);
        assert_eq!(ty.to_string(), "Map<string, Collection<Value<int>>>");
        assert_eq!(parse_model_type("Action").unwrap(), ModelInstanceType::action());
    }

    #[test]
    fn test_errors() {
        assert!(parse_element_type("Value<int").is_err());
        assert!(parse_element_type("Value<int, int>").is_err());
        assert!(parse_element_type("widget").is_err());
        assert!(parse_model_type("int").is_err());
        assert!(parse_element_type("int int").is_err());
    }
}
