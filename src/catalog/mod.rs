pub mod depend;
pub mod schema;
pub mod types;

use crate::catalog::depend::{DependEdge, ObjectAddress};
use crate::catalog::schema::{
    ConstraintDef, DomainDef, IndexDef, InheritEdge, Privilege, RelKind, RelationDef, RoleDef,
    RuleDef, TriggerDef,
};
use crate::catalog::types::{AttrNumber, FIRST_NORMAL_OID, Oid};
use crate::error::{AlterError, ObjectKindName};
use crate::expr::TypeLookup;
use compact_str::CompactString;
use std::collections::{BTreeSet, VecDeque};

pub const DEFAULT_NAMESPACE: &str = "public";
pub const SYSTEM_NAMESPACE: &str = "pg_catalog";
pub const TEMP_NAMESPACE: &str = "pg_temp";
pub const GLOBAL_TABLESPACE: &str = "pg_global";

/// System catalog state. Every map is a persistent structure, so
/// [`Catalog::snapshot`] is cheap and rollback restores a snapshot.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub relations: im::HashMap<Oid, RelationDef>,
    names: im::HashMap<(CompactString, CompactString), Oid>,
    pub constraints: im::HashMap<Oid, ConstraintDef>,
    pub indexes: im::HashMap<Oid, IndexDef>,
    pub inherits: im::Vector<InheritEdge>,
    pub depends: im::Vector<DependEdge>,
    pub triggers: im::HashMap<Oid, TriggerDef>,
    pub rules: im::HashMap<Oid, RuleDef>,
    pub comments: im::HashMap<ObjectAddress, String>,
    pub roles: im::HashMap<CompactString, RoleDef>,
    pub tablespaces: im::HashSet<CompactString>,
    pub domains: im::HashMap<CompactString, DomainDef>,
    pub grants: im::HashSet<(CompactString, Oid, Privilege)>,
    next_oid: Oid,
}

impl Catalog {
    pub fn bootstrap(default_tablespace: &str) -> Self {
        let mut catalog = Catalog {
            next_oid: FIRST_NORMAL_OID,
            ..Catalog::default()
        };
        catalog.tablespaces.insert(default_tablespace.into());
        catalog.tablespaces.insert(GLOBAL_TABLESPACE.into());
        catalog.roles.insert(
            "postgres".into(),
            RoleDef {
                name: "postgres".into(),
                superuser: true,
                policy_exempt: true,
            },
        );
        // A protected relation stands in for the system catalogs.
        let mut pg_class = RelationDef::new(1259, "pg_class", SYSTEM_NAMESPACE, RelKind::Table, "postgres");
        pg_class.is_system = true;
        catalog.insert_relation(pg_class);
        catalog
    }

    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn alloc_oid(&mut self) -> Oid {
        let oid = self.next_oid.max(FIRST_NORMAL_OID);
        self.next_oid = oid + 1;
        oid
    }

    pub fn insert_relation(&mut self, rel: RelationDef) {
        self.names
            .insert((rel.namespace.clone(), rel.name.clone()), rel.oid);
        self.relations.insert(rel.oid, rel);
    }

    pub fn remove_relation(&mut self, oid: Oid) -> Option<RelationDef> {
        let rel = self.relations.remove(&oid)?;
        self.names.remove(&(rel.namespace.clone(), rel.name.clone()));
        Some(rel)
    }

    pub fn relation(&self, oid: Oid) -> Result<&RelationDef, AlterError> {
        self.relations
            .get(&oid)
            .ok_or_else(|| AlterError::internal(format!("cache lookup failed for relation {oid}")))
    }

    pub fn relation_mut(&mut self, oid: Oid) -> Result<&mut RelationDef, AlterError> {
        self.relations
            .get_mut(&oid)
            .ok_or_else(|| AlterError::internal(format!("cache lookup failed for relation {oid}")))
    }

    pub fn relation_name(&self, oid: Oid) -> String {
        self.relations
            .get(&oid)
            .map(|r| r.name.to_string())
            .unwrap_or_else(|| format!("#{oid}"))
    }

    /// Resolves `name` or `namespace.name`; unqualified names search the
    /// temporary namespace, then the default one, then the system one.
    pub fn lookup(&self, name: &str) -> Option<Oid> {
        if let Some((ns, rel)) = name.split_once('.') {
            return self
                .names
                .get(&(CompactString::from(ns), CompactString::from(rel)))
                .copied();
        }
        [TEMP_NAMESPACE, DEFAULT_NAMESPACE, SYSTEM_NAMESPACE]
            .iter()
            .find_map(|ns| {
                self.names
                    .get(&(CompactString::from(*ns), CompactString::from(name)))
                    .copied()
            })
    }

    pub fn lookup_required(&self, name: &str) -> Result<Oid, AlterError> {
        self.lookup(name).ok_or_else(|| AlterError::UndefinedTable {
            relation: name.to_string(),
        })
    }

    pub fn name_taken(&self, namespace: &str, name: &str) -> bool {
        self.names
            .contains_key(&(CompactString::from(namespace), CompactString::from(name)))
    }

    /// Direct parents in inheritance order.
    pub fn parents(&self, child: Oid) -> Vec<Oid> {
        let mut edges: Vec<_> = self.inherits.iter().filter(|e| e.child == child).collect();
        edges.sort_by_key(|e| e.seqno);
        edges.into_iter().map(|e| e.parent).collect()
    }

    /// Direct children ordered by oid so traversal order is stable.
    pub fn children(&self, parent: Oid) -> Vec<Oid> {
        let set: BTreeSet<Oid> = self
            .inherits
            .iter()
            .filter(|e| e.parent == parent)
            .map(|e| e.child)
            .collect();
        set.into_iter().collect()
    }

    pub fn has_subclass(&self, parent: Oid) -> bool {
        self.inherits.iter().any(|e| e.parent == parent)
    }

    /// `root` followed by every direct and indirect inheritor, each exactly
    /// once, in breadth-first order so parents precede their children.
    pub fn find_all_inheritors(&self, root: Oid) -> Vec<Oid> {
        let mut seen = BTreeSet::from([root]);
        let mut order = vec![root];
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            for child in self.children(current) {
                if seen.insert(child) {
                    order.push(child);
                    queue.push_back(child);
                }
            }
        }
        order
    }

    /// `find_all_inheritors` paired with how many of each relation's
    /// parents lie inside the tree rooted at `root`.
    pub fn inheritors_with_parent_counts(&self, root: Oid) -> Vec<(Oid, i32)> {
        let tree = self.find_all_inheritors(root);
        let members: BTreeSet<Oid> = tree.iter().copied().collect();
        tree.into_iter()
            .map(|oid| {
                let inside = self
                    .parents(oid)
                    .into_iter()
                    .filter(|p| members.contains(p))
                    .count();
                (oid, inside as i32)
            })
            .collect()
    }

    pub fn add_inherit_edge(&mut self, child: Oid, parent: Oid) -> i32 {
        let seqno = self.parents(child).len() as i32 + 1;
        self.inherits.push_back(InheritEdge {
            child,
            parent,
            seqno,
        });
        seqno
    }

    pub fn remove_inherit_edge(&mut self, child: Oid, parent: Oid) -> bool {
        let before = self.inherits.len();
        self.inherits
            .retain(|e| !(e.child == child && e.parent == parent));
        let removed = self.inherits.len() != before;
        // Renumber the survivors so sequence numbers stay dense.
        let mut seq = 0;
        let parents = self.parents(child);
        self.inherits.retain(|e| e.child != child);
        for p in parents {
            seq += 1;
            self.inherits.push_back(InheritEdge {
                child,
                parent: p,
                seqno: seq,
            });
        }
        removed
    }

    pub fn partition_parent(&self, child: Oid) -> Option<Oid> {
        let rel = self.relations.get(&child)?;
        if !rel.is_partition {
            return None;
        }
        self.parents(child).into_iter().next()
    }

    pub fn constraints_of(&self, relid: Oid) -> Vec<&ConstraintDef> {
        let mut out: Vec<_> = self
            .constraints
            .values()
            .filter(|c| c.relid == relid)
            .collect();
        out.sort_by_key(|c| c.oid);
        out
    }

    pub fn constraint_by_name(&self, relid: Oid, name: &str) -> Option<&ConstraintDef> {
        self.constraints
            .values()
            .find(|c| c.relid == relid && c.name == name)
    }

    pub fn constraint(&self, oid: Oid) -> Result<&ConstraintDef, AlterError> {
        self.constraints
            .get(&oid)
            .ok_or_else(|| AlterError::internal(format!("cache lookup failed for constraint {oid}")))
    }

    pub fn constraint_mut(&mut self, oid: Oid) -> Result<&mut ConstraintDef, AlterError> {
        self.constraints
            .get_mut(&oid)
            .ok_or_else(|| AlterError::internal(format!("cache lookup failed for constraint {oid}")))
    }

    /// Picks a constraint name not used on `relid`, in the
    /// `table_column_suffix` pattern with a numeric tiebreaker.
    pub fn choose_constraint_name(&self, relid: Oid, column: Option<&str>, suffix: &str) -> String {
        let table = self.relation_name(relid);
        let base = match column {
            Some(col) => format!("{table}_{col}_{suffix}"),
            None => format!("{table}_{suffix}"),
        };
        let mut candidate = base.clone();
        let mut n = 0;
        while self.constraint_by_name(relid, &candidate).is_some() {
            n += 1;
            candidate = format!("{base}{n}");
        }
        candidate
    }

    /// Picks a relation name unused in `namespace`.
    pub fn choose_relation_name(&self, namespace: &str, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 0;
        while self.name_taken(namespace, &candidate) {
            n += 1;
            candidate = format!("{base}{n}");
        }
        candidate
    }

    pub fn indexes_of(&self, relid: Oid) -> Vec<&IndexDef> {
        let mut out: Vec<_> = self.indexes.values().filter(|i| i.relid == relid).collect();
        out.sort_by_key(|i| i.oid);
        out
    }

    pub fn index(&self, oid: Oid) -> Result<&IndexDef, AlterError> {
        self.indexes
            .get(&oid)
            .ok_or_else(|| AlterError::internal(format!("cache lookup failed for index {oid}")))
    }

    pub fn triggers_of(&self, relid: Oid) -> Vec<&TriggerDef> {
        let mut out: Vec<_> = self.triggers.values().filter(|t| t.relid == relid).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn rules_of(&self, relid: Oid) -> Vec<&RuleDef> {
        let mut out: Vec<_> = self.rules.values().filter(|r| r.relid == relid).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn comment(&self, addr: &ObjectAddress) -> Option<&str> {
        self.comments.get(addr).map(String::as_str)
    }

    pub fn set_comment(&mut self, addr: ObjectAddress, comment: Option<String>) {
        match comment {
            Some(text) => {
                self.comments.insert(addr, text);
            }
            None => {
                self.comments.remove(&addr);
            }
        }
    }

    pub fn role(&self, name: &str) -> Result<&RoleDef, AlterError> {
        self.roles.get(name).ok_or_else(|| AlterError::UndefinedObject {
            kind: ObjectKindName::Role,
            name: name.to_string(),
        })
    }

    pub fn has_grant(&self, role: &str, relid: Oid, privilege: Privilege) -> bool {
        self.grants
            .contains(&(CompactString::from(role), relid, privilege))
    }

    /// Maps each live attribute of `from` to the attribute of `to` with the
    /// same name.
    pub fn attribute_map(
        &self,
        from: Oid,
        to: Oid,
    ) -> Result<Vec<(AttrNumber, AttrNumber)>, AlterError> {
        let src = self.relation(from)?;
        let dst = self.relation(to)?;
        let mut map = Vec::new();
        for att in src.live_attributes() {
            if let Some(target) = dst.attribute_by_name(&att.name) {
                map.push((att.attnum, target.attnum));
            }
        }
        Ok(map)
    }
}

impl TypeLookup for Catalog {
    fn domain(&self, name: &str) -> Option<&DomainDef> {
        self.domains.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(catalog: &mut Catalog, name: &str) -> Oid {
        let oid = catalog.alloc_oid();
        catalog.insert_relation(RelationDef::new(oid, name, DEFAULT_NAMESPACE, RelKind::Table, "alice"));
        oid
    }

    #[test]
    fn inheritors_are_visited_once_parents_first() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let p1 = table(&mut catalog, "p1");
        let p2 = table(&mut catalog, "p2");
        let c1 = table(&mut catalog, "c1");
        let c2 = table(&mut catalog, "c2");
        let g = table(&mut catalog, "g");
        catalog.add_inherit_edge(c1, p1);
        catalog.add_inherit_edge(c2, p1);
        catalog.add_inherit_edge(c2, p2);
        catalog.add_inherit_edge(g, c1);
        catalog.add_inherit_edge(g, c2);
        assert_eq!(catalog.find_all_inheritors(p1), vec![p1, c1, c2, g]);
        assert_eq!(catalog.parents(c2), vec![p1, p2]);
        assert_eq!(
            catalog.inheritors_with_parent_counts(p1),
            vec![(p1, 0), (c1, 1), (c2, 1), (g, 2)]
        );
    }

    #[test]
    fn removing_an_edge_renumbers_the_rest() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let p1 = table(&mut catalog, "p1");
        let p2 = table(&mut catalog, "p2");
        let c = table(&mut catalog, "c");
        catalog.add_inherit_edge(c, p1);
        catalog.add_inherit_edge(c, p2);
        assert!(catalog.remove_inherit_edge(c, p1));
        assert!(!catalog.remove_inherit_edge(c, p1));
        let edges: Vec<_> = catalog.inherits.iter().filter(|e| e.child == c).collect();
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].parent, edges[0].seqno), (p2, 1));
    }

    #[test]
    fn lookup_prefers_temp_namespace() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let public = table(&mut catalog, "t");
        let oid = catalog.alloc_oid();
        catalog.insert_relation(RelationDef::new(oid, "t", TEMP_NAMESPACE, RelKind::Table, "alice"));
        assert_eq!(catalog.lookup("t"), Some(oid));
        assert_eq!(catalog.lookup("public.t"), Some(public));
        assert_eq!(catalog.lookup("pg_class"), Some(1259));
        assert!(catalog.lookup_required("missing").is_err());
    }
}
