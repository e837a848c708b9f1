//! Predecessor discovery.
//!
//! An element can only be written once every element it refers to exists in
//! the target. Those references are found by walking the element's fixed
//! reference fields (model, parent, code scope) and the navigation
//! properties its class declares. The class metadata comes from the
//! repository at run time, so classes from schemas imported moments ago are
//! handled the same way as built-in ones.

use std::fmt;
use twinsync_core::{ElementProps, Id64, PropertyValue};

/// A field of an element that holds a reference to another element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReferenceField {
    /// The containing model.
    Model,
    /// The parent element.
    Parent,
    /// The scope of the element's code.
    CodeScope,
    /// A navigation property.
    Property(String),
}

impl fmt::Display for ReferenceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceField::Model => f.write_str("model"),
            ReferenceField::Parent => f.write_str("parent"),
            ReferenceField::CodeScope => f.write_str("code scope"),
            ReferenceField::Property(name) => write!(f, "property {name}"),
        }
    }
}

/// One reference from an element to a predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predecessor {
    /// Field holding the reference.
    pub field: ReferenceField,
    /// The referenced element id.
    pub id: Id64,
}

/// Lists the predecessors of an element.
///
/// `reference_properties` are the navigation property names of the
/// element's class, including inherited ones. Invalid ids, self references
/// and the repository model are not predecessors.
pub fn element_predecessors(element: &ElementProps, reference_properties: &[String]) -> Vec<Predecessor> {
    let mut found = Vec::new();
    let mut push = |field: ReferenceField, id: Id64| {
        if id.is_valid() && id != element.id {
            found.push(Predecessor { field, id });
        }
    };

    if element.model != Id64::REPOSITORY_MODEL {
        push(ReferenceField::Model, element.model);
    }
    if let Some(parent) = element.parent {
        push(ReferenceField::Parent, parent);
    }
    if !element.code.is_empty() {
        push(ReferenceField::CodeScope, element.code.scope);
    }
    for name in reference_properties {
        if let Some(id) = element.property(name).and_then(PropertyValue::as_id) {
            push(ReferenceField::Property(name.clone()), id);
        }
    }
    found
}

/// Rewrites the id held by `field`. A parent rewritten to the invalid id is
/// removed.
pub(crate) fn set_reference(element: &mut ElementProps, field: &ReferenceField, id: Id64) {
    match field {
        ReferenceField::Model => element.model = id,
        ReferenceField::Parent => element.parent = id.valid(),
        ReferenceField::CodeScope => element.code.scope = id,
        ReferenceField::Property(name) => {
            element
                .properties
                .insert(name.clone(), PropertyValue::Id(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_core::{classes, Code};

    fn pump() -> ElementProps {
        let mut element = ElementProps::new("Plant:Pump", Id64::new(0x30))
            .with_parent(Id64::new(0x31))
            .with_code(Code::new(Id64::new(0x20), Id64::new(0x32), "P-1"))
            .with_property("category", Id64::new(0x33))
            .with_property("feeds", Id64::new(0x34))
            .with_property("flow", 12i64);
        element.id = Id64::new(0x40);
        element
    }

    #[test]
    fn walks_fixed_fields_and_navigation_properties() {
        let props = vec!["category".to_string(), "feeds".to_string()];
        let found = element_predecessors(&pump(), &props);
        let fields: Vec<ReferenceField> = found.iter().map(|p| p.field.clone()).collect();
        assert_eq!(
            fields,
            vec![
                ReferenceField::Model,
                ReferenceField::Parent,
                ReferenceField::CodeScope,
                ReferenceField::Property("category".into()),
                ReferenceField::Property("feeds".into()),
            ]
        );
    }

    #[test]
    fn undeclared_id_properties_are_not_predecessors() {
        let found = element_predecessors(&pump(), &["category".to_string()]);
        assert!(found.iter().all(|p| p.id != Id64::new(0x34)));
    }

    #[test]
    fn skips_invalid_self_and_repository_model() {
        let mut element = ElementProps::new(classes::SUBJECT, Id64::REPOSITORY_MODEL)
            .with_property("category", Id64::INVALID);
        element.id = Id64::new(0x50);
        element = element.with_parent(Id64::new(0x50));
        assert!(element_predecessors(&element, &["category".to_string()]).is_empty());
    }

    #[test]
    fn empty_code_has_no_scope_predecessor() {
        let mut element = pump();
        element.code = Code::empty();
        let found = element_predecessors(&element, &[]);
        assert!(found.iter().all(|p| p.field != ReferenceField::CodeScope));
    }

    #[test]
    fn invalid_parent_is_removed() {
        let mut element = pump();
        set_reference(&mut element, &ReferenceField::Parent, Id64::INVALID);
        assert_eq!(element.parent, None);
        set_reference(&mut element, &ReferenceField::Property("feeds".into()), Id64::new(0x99));
        assert_eq!(element.property("feeds"), Some(&PropertyValue::Id(Id64::new(0x99))));
    }
}
