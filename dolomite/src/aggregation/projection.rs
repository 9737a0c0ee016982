use crate::collection::Document;
use crate::common::util::document_utils::{
    change_subdocument_value, remove_subdocument_value,
};
use crate::common::util::path_utils::split_path;
use crate::common::{Value, DOC_ID};
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use crate::expression::Expr;

#[derive(Clone, Debug)]
enum ProjectionField {
    Include,
    Exclude,
    Compute(Expr),
}

/// A compiled projection specification.
///
/// Keys with `1`/`true` values are inclusions, `0`/`false` exclusions, and
/// anything else a computed expression. Inclusions and exclusions cannot be
/// mixed, except that `_id` may be excluded alongside inclusions. Computed
/// fields imply inclusion mode.
///
/// Nested keys apply inside nested documents and fan out over arrays, and
/// output field order follows the source document for included fields and
/// the projection declaration order for computed fields.
#[derive(Clone, Debug)]
pub struct Projection {
    fields: Vec<(String, ProjectionField)>,
    exclude_id: bool,
    inclusion_mode: bool,
}

impl Projection {
    /// Compiles a projection document.
    pub fn new(spec: &Document) -> DolomiteResult<Projection> {
        if spec.is_empty() {
            log::error!("Empty projection specification");
            return Err(DolomiteError::new(
                "specification must have at least one field",
                ErrorKind::Location(40177),
            ));
        }

        let mut fields = Vec::with_capacity(spec.len());
        let mut exclude_id = false;
        let mut id_included = false;
        let mut inclusions = false;
        let mut exclusions: Option<String> = None;

        for (key, value) in spec.iter() {
            let field = match value {
                Value::Bool(true) => ProjectionField::Include,
                Value::Bool(false) => ProjectionField::Exclude,
                number if number.is_number() => {
                    if number.is_truthy() {
                        ProjectionField::Include
                    } else {
                        ProjectionField::Exclude
                    }
                }
                expression => ProjectionField::Compute(Expr::parse(expression)?),
            };

            if key == DOC_ID {
                match field {
                    ProjectionField::Exclude => {
                        exclude_id = true;
                        continue;
                    }
                    // an explicit `_id` inclusion is allowed in both modes
                    ProjectionField::Include => {
                        id_included = true;
                        continue;
                    }
                    ProjectionField::Compute(_) => {
                        inclusions = true;
                        fields.push((key.clone(), field));
                        continue;
                    }
                }
            }

            match &field {
                ProjectionField::Include | ProjectionField::Compute(_) => inclusions = true,
                ProjectionField::Exclude => exclusions = Some(key.clone()),
            }
            fields.push((key.clone(), field));
        }

        if inclusions {
            if let Some(excluded) = exclusions {
                return Err(DolomiteError::new(
                    &format!(
                        "Cannot do exclusion on field {} in inclusion projection",
                        excluded
                    ),
                    ErrorKind::BadValue,
                ));
            }
        }

        Ok(Projection {
            fields,
            exclude_id,
            inclusion_mode: inclusions || (id_included && exclusions.is_none()),
        })
    }

    /// Projects one document.
    pub fn project(&self, document: &Document) -> DolomiteResult<Document> {
        if self.inclusion_mode {
            self.project_inclusions(document)
        } else {
            self.project_exclusions(document)
        }
    }

    fn project_exclusions(&self, document: &Document) -> DolomiteResult<Document> {
        let mut result = document.clone();
        if self.exclude_id {
            result.remove(DOC_ID);
        }
        for (key, _) in &self.fields {
            remove_subdocument_value(&mut result, key, &mut None)?;
        }
        Ok(result)
    }

    fn project_inclusions(&self, document: &Document) -> DolomiteResult<Document> {
        let mut result = Document::new();
        if !self.exclude_id {
            if let Some(id) = document.get(DOC_ID) {
                result.put(DOC_ID, id.clone())?;
            }
        }
        for (key, field) in &self.fields {
            match field {
                ProjectionField::Include => {
                    let fragments = split_path(key);
                    project_field(document, &mut result, &fragments)?;
                }
                ProjectionField::Compute(expression) => {
                    let value = expression.evaluate(document)?;
                    if !value.is_missing() {
                        change_subdocument_value(&mut result, key, value, &mut None)?;
                    }
                }
                ProjectionField::Exclude => {}
            }
        }
        Ok(result)
    }
}

/// Copies the value at an inclusion path into the result, rebuilding nested
/// documents and fanning out over arrays. Multiple paths under one parent
/// merge into the same nested structure.
fn project_field(
    input: &Document,
    result: &mut Document,
    fragments: &[&str],
) -> DolomiteResult<()> {
    let main = fragments[0];
    if fragments.len() == 1 {
        if let Some(value) = input.get(main) {
            result.put(main, value.clone())?;
        }
        return Ok(());
    }
    let rest = &fragments[1..];
    match input.get(main) {
        Some(Value::Document(sub)) => {
            if !result.contains_key(main) {
                result.put(main, Value::Document(Document::new()))?;
            }
            if let Some(Value::Document(nested)) = result.get_mut(main) {
                project_field(sub, nested, rest)?;
            }
            Ok(())
        }
        Some(Value::Array(items)) => {
            if !result.contains_key(main) {
                let mut projected = Vec::new();
                for item in items {
                    if let Value::Document(element) = item {
                        let mut nested = Document::new();
                        project_field(element, &mut nested, rest)?;
                        projected.push(Value::Document(nested));
                    }
                }
                result.put(main, Value::Array(projected))?;
                Ok(())
            } else {
                // a later path under the same parent merges element-wise;
                // indexes align because both passes keep document elements only
                let mut nested_docs = Vec::new();
                for item in items {
                    if let Value::Document(element) = item {
                        nested_docs.push(element);
                    }
                }
                if let Some(Value::Array(existing)) = result.get_mut(main) {
                    for (slot, element) in existing.iter_mut().zip(nested_docs) {
                        if let Value::Document(nested) = slot {
                            project_field(element, nested, rest)?;
                        }
                    }
                }
                Ok(())
            }
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn project(document: Document, spec: Document) -> Document {
        Projection::new(&spec).unwrap().project(&document).unwrap()
    }

    #[test]
    fn test_project() {
        assert_eq!(
            project(doc! { a: "value" }, doc! { a: true }),
            doc! { a: "value" }
        );
        assert_eq!(project(doc! { "_id": 1 }, doc! { a: 1 }), doc! { "_id": 1 });
        assert_eq!(
            project(doc! { "_id": 1, a: "value" }, doc! { a: 1 }),
            doc! { "_id": 1, a: "value" }
        );
        assert_eq!(
            project(doc! { "_id": 1, a: "value" }, doc! { "_id": 0 }),
            doc! { a: "value" }
        );
        assert_eq!(
            project(
                doc! { "_id": 1, a: 10, b: 20, c: (-30) },
                doc! { "_id": 0, x: { "$abs": "$c" }, b: 1 }
            ),
            doc! { x: 30, b: 20 }
        );
        assert_eq!(
            project(
                doc! { "_id": 1, a: 10, b: 20, c: (-30) },
                doc! { x: { "$abs": "$c" } }
            ),
            doc! { "_id": 1, x: 30 }
        );
        assert_eq!(
            project(
                doc! { "_id": 1, c: (-30) },
                doc! { x: { y: { "$abs": "$c" } } }
            ),
            doc! { "_id": 1, x: { y: 30 } }
        );
        assert_eq!(
            project(
                doc! { "_id": 1, b: 2, c: (-30) },
                doc! { x: { y: { "$multiply": ["$b", { "$abs": "$c" }] } } }
            ),
            doc! { "_id": 1, x: { y: 60 } }
        );
        assert_eq!(
            project(
                doc! { a: [1, 2, 3] },
                doc! { b: { "$arrayElemAt": ["$a", 1] } }
            ),
            doc! { b: 2 }
        );
        assert_eq!(
            project(
                doc! { a: [{ foo: "bar" }, { foo: "bas" }, { foo: "bat" }] },
                doc! { b: { "$arrayElemAt": ["$a.foo", 1] } }
            ),
            doc! { b: "bas" }
        );
    }

    #[test]
    fn test_project_with_nested_exclusion() {
        assert_eq!(
            project(
                doc! { "_id": 1, x: { a: 1, b: 2, c: 3 } },
                doc! { "x.b": 0 }
            ),
            doc! { "_id": 1, x: { a: 1, c: 3 } }
        );
    }

    #[test]
    fn test_project_with_nested_exclusion_array() {
        assert_eq!(
            project(
                doc! { "_id": 1, x: [{ a: 1, b: 2, c: 3 }, { a: 2 }] },
                doc! { "x.b": 0 }
            ),
            doc! { "_id": 1, x: [{ a: 1, c: 3 }, { a: 2 }] }
        );
    }

    #[test]
    fn test_project_with_nested_inclusion() {
        assert_eq!(
            project(
                doc! { "_id": 1, x: { a: 1, b: 2, c: 3 } },
                doc! { "x.b": 1, "x.c": 1, y: 1, "x.d": 1 }
            ),
            doc! { "_id": 1, x: { b: 2, c: 3 } }
        );
    }

    #[test]
    fn test_project_with_nested_inclusion_array() {
        assert_eq!(
            project(
                doc! { "_id": 1, x: [{ a: 1, b: 2 }, { a: 2 }] },
                doc! { "x.b": 1 }
            ),
            doc! { "_id": 1, x: [{ b: 2 }, {}] }
        );
    }

    #[test]
    fn test_project_with_field_to_be_evaluated() {
        assert_eq!(
            project(
                doc! { "_id": 1, count: 5 },
                doc! { "_id": 1, x: { count: "$count" } }
            ),
            doc! { "_id": 1, x: { count: 5 } }
        );
    }

    #[test]
    fn test_project_with_field_within_array_to_be_evaluated() {
        assert_eq!(
            project(
                doc! { "_id": 1, count: 5 },
                doc! { "_id": 1, x: [{ count: "$count" }] }
            ),
            doc! { "_id": 1, x: [{ count: 5 }] }
        );
    }

    #[test]
    fn test_illegal_project() {
        let err = Projection::new(&doc! {}).unwrap_err();
        assert_eq!(err.code(), 40177);
        assert_eq!(err.message(), "specification must have at least one field");
    }

    #[test]
    fn test_mixed_projection_is_rejected() {
        let err = Projection::new(&doc! { a: 1, b: 0 }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::BadValue);
        assert!(err.message().contains("Cannot do exclusion on field b"));
    }

    #[test]
    fn test_projection_is_idempotent() {
        let doc = doc! { "_id": 1, a: 10, b: 20, x: [{ a: 1, b: 2 }, { a: 2 }] };
        for spec in [doc! { "_id": 0, b: 1, "x.a": 1 }, doc! { "x.b": 0, a: 0 }] {
            let projection = Projection::new(&spec).unwrap();
            let once = projection.project(&doc).unwrap();
            let twice = projection.project(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_exclusion_only_keeps_id() {
        assert_eq!(
            project(doc! { "_id": 1, a: 2, b: 3 }, doc! { b: 0 }),
            doc! { "_id": 1, a: 2 }
        );
    }

    #[test]
    fn test_id_only_inclusion() {
        assert_eq!(
            project(doc! { "_id": 1, a: 2 }, doc! { "_id": 1 }),
            doc! { "_id": 1 }
        );
        // an explicit _id inclusion is legal alongside exclusions
        assert_eq!(
            project(doc! { "_id": 1, a: 2, b: 3 }, doc! { "_id": 1, b: 0 }),
            doc! { "_id": 1, a: 2 }
        );
    }
}
