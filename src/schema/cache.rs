//! In-memory schema cache: id maps plus the module/API name index. One immutable snapshot per request.

use crate::error::SchemaError;
use crate::schema::{api_key, validate, Api, Attribute, Join, Module, Query, Relation, SchemaDefinition};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-wide cache. Requests hold the read guard for their whole lifetime; reloads take the write guard.
pub type SharedSchema = Arc<RwLock<SchemaCache>>;

#[derive(Clone, Debug, Default)]
pub struct SchemaCache {
    modules: HashMap<Uuid, Module>,
    relations: HashMap<Uuid, Relation>,
    attributes: HashMap<Uuid, Attribute>,
    apis: HashMap<Uuid, Api>,
    /// module name -> "api.vN" -> API id
    module_api_name_map: HashMap<String, HashMap<String, Uuid>>,
}

impl SchemaCache {
    /// Validate and index a loaded definition.
    pub fn build(mut def: SchemaDefinition) -> Result<Self, SchemaError> {
        for api in &mut def.apis {
            normalize_joins(api);
        }
        validate(&def)?;

        let modules: HashMap<Uuid, Module> = def.modules.into_iter().map(|m| (m.id, m)).collect();
        let mut module_api_name_map: HashMap<String, HashMap<String, Uuid>> = HashMap::new();
        for api in &def.apis {
            let module = modules.get(&api.module_id).ok_or(SchemaError::UnknownModule(api.module_id))?;
            module_api_name_map
                .entry(module.name.clone())
                .or_default()
                .insert(api.key(), api.id);
        }
        Ok(SchemaCache {
            modules,
            relations: def.relations.into_iter().map(|r| (r.id, r)).collect(),
            attributes: def.attributes.into_iter().map(|a| (a.id, a)).collect(),
            apis: def.apis.into_iter().map(|a| (a.id, a)).collect(),
            module_api_name_map,
        })
    }

    pub fn shared(self) -> SharedSchema {
        Arc::new(RwLock::new(self))
    }

    pub fn module(&self, id: Uuid) -> Result<&Module, SchemaError> {
        self.modules.get(&id).ok_or(SchemaError::UnknownModule(id))
    }

    pub fn relation(&self, id: Uuid) -> Result<&Relation, SchemaError> {
        self.relations.get(&id).ok_or(SchemaError::UnknownRelation(id))
    }

    pub fn attribute(&self, id: Uuid) -> Result<&Attribute, SchemaError> {
        self.attributes.get(&id).ok_or(SchemaError::UnknownAttribute(id))
    }

    /// Primary key attribute of a relation.
    pub fn pk_attribute(&self, relation_id: Uuid) -> Result<&Attribute, SchemaError> {
        let rel = self.relation(relation_id)?;
        self.attribute(rel.attribute_id_pk)
    }

    /// API by module name, API name and version.
    pub fn api_by_name(&self, module: &str, name: &str, version: u32) -> Option<&Api> {
        let id = self.module_api_name_map.get(module)?.get(&api_key(name, version))?;
        self.apis.get(id)
    }

    /// All file-set attributes with their owning relation.
    pub fn files_attributes(&self) -> Vec<(&Attribute, &Relation)> {
        self.attributes
            .values()
            .filter(|a| a.content.is_files())
            .filter_map(|a| self.relations.get(&a.relation_id).map(|r| (a, r)))
            .collect()
    }

    pub fn api_count(&self) -> usize {
        self.apis.len()
    }
}

/// Sort joins by index and add the implicit root join when only the base relation is given.
fn normalize_joins(api: &mut Api) {
    normalize_query(&mut api.query);
    for column in &mut api.columns {
        if let Some(sub) = column.query.as_mut() {
            normalize_query(sub);
        }
    }
}

fn normalize_query(query: &mut Query) {
    if let Some(root) = query.relation_id {
        if query.join(0).is_none() {
            query.joins.push(Join {
                index: 0,
                index_from: 0,
                relation_id: root,
                attribute_id: None,
                connector: Default::default(),
                apply_delete: true,
            });
        }
    }
    query.joins.sort_by_key(|j| j.index);
}
