use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleClass {
    Teacher,
    Student,
}

impl RoleClass {
    pub const ALL: [RoleClass; 2] = [RoleClass::Teacher, RoleClass::Student];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Default,
    Global,
    Tenant,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedAccess {
    pub value: bool,
    pub source: Source,
    pub explicit: bool,
}

/// Storage scope of one override row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Tenant(i64),
    Group(i64),
}

impl Scope {
    pub fn kind(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Tenant(_) => "tenant",
            Self::Group(_) => "group",
        }
    }

    /// Global rows are stored with scope id 0.
    pub fn scope_id(self) -> i64 {
        match self {
            Self::Global => 0,
            Self::Tenant(id) | Self::Group(id) => id,
        }
    }

    fn from_row(kind: &str, scope_id: i64) -> Option<Self> {
        match kind {
            "global" => Some(Self::Global),
            "tenant" => Some(Self::Tenant(scope_id)),
            "group" => Some(Self::Group(scope_id)),
            _ => None,
        }
    }

    fn source(self) -> Source {
        match self {
            Self::Global => Source::Global,
            Self::Tenant(_) => Source::Tenant,
            Self::Group(_) => Source::Group,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: String,
    pub name: String,
    pub default_enabled: bool,
    #[serde(default)]
    pub sort_order: i64,
}

/// A school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub top_category_id: Option<i64>,
}

/// A cohort inside a school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    #[error("invalid scope: {0}")]
    InvalidScope(String),
}

impl AccessError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownFeature(_) => "unknown_feature",
            Self::InvalidScope(_) => "invalid_scope",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GrantState {
    pub granted: bool,
    pub explicit: bool,
}

pub type RoleCells = BTreeMap<RoleClass, ResolvedAccess>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupColumn {
    pub group_id: i64,
    pub name: String,
    pub roles: RoleCells,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantColumn {
    pub tenant_id: i64,
    pub name: String,
    pub grant: GrantState,
    pub roles: RoleCells,
    pub groups: Vec<GroupColumn>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRow {
    pub feature: Feature,
    pub global: RoleCells,
    pub tenants: Vec<TenantColumn>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Matrix {
    pub tenant_id: Option<i64>,
    pub role_classes: Vec<RoleClass>,
    pub features: Vec<FeatureRow>,
}

/// Read-only view of the catalog, grants and overrides, fetched once per
/// request.
#[derive(Debug, Clone, Default)]
pub struct AccessSnapshot {
    features: BTreeMap<String, Feature>,
    tenants: BTreeMap<i64, Tenant>,
    groups: BTreeMap<i64, Group>,
    grants: HashMap<(String, i64), bool>,
    overrides: HashMap<(String, Scope, RoleClass), bool>,
}

impl AccessSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut snap = Self::new();

        let mut stmt =
            conn.prepare("SELECT id, name, default_enabled, sort_order FROM features")?;
        let features = stmt
            .query_map([], |row| {
                Ok(Feature {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    default_enabled: row.get::<_, i64>(2)? != 0,
                    sort_order: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for f in features {
            snap.features.insert(f.id.clone(), f);
        }

        let mut stmt =
            conn.prepare("SELECT id, name, short_name, top_category_id FROM tenants")?;
        let tenants = stmt
            .query_map([], |row| {
                Ok(Tenant {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    short_name: row.get(2)?,
                    top_category_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for t in tenants {
            snap.tenants.insert(t.id, t);
        }

        let mut stmt = conn.prepare("SELECT id, tenant_id, name FROM cohorts")?;
        let groups = stmt
            .query_map([], |row| {
                Ok(Group {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for g in groups {
            snap.groups.insert(g.id, g);
        }

        let mut stmt = conn.prepare("SELECT feature_id, tenant_id, granted FROM feature_grants")?;
        let grants = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)? != 0,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (feature, tenant_id, granted) in grants {
            snap.grants.insert((feature, tenant_id), granted);
        }

        let mut stmt = conn.prepare(
            "SELECT feature_id, scope, scope_id, role_class, enabled FROM feature_overrides",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)? != 0,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (feature, kind, scope_id, role_raw, enabled) in rows {
            let (Some(scope), Some(role)) =
                (Scope::from_row(&kind, scope_id), RoleClass::parse(&role_raw))
            else {
                warn!(
                    feature = %feature,
                    scope = %kind,
                    role_class = %role_raw,
                    "skipping malformed override row"
                );
                continue;
            };
            snap.overrides.insert((feature, scope, role), enabled);
        }

        Ok(snap)
    }

    pub fn group(&self, id: i64) -> Option<&Group> {
        self.groups.get(&id)
    }

    fn check_scope(&self, tenant_id: Option<i64>, group_id: Option<i64>) -> Result<(), AccessError> {
        if let Some(t) = tenant_id {
            if !self.tenants.contains_key(&t) {
                return Err(AccessError::InvalidScope(format!("unknown tenant {t}")));
            }
        }
        if let Some(g) = group_id {
            let Some(t) = tenant_id else {
                return Err(AccessError::InvalidScope(format!(
                    "group {g} given without a tenant"
                )));
            };
            match self.groups.get(&g) {
                None => {
                    return Err(AccessError::InvalidScope(format!("unknown group {g}")));
                }
                Some(group) if group.tenant_id != t => {
                    return Err(AccessError::InvalidScope(format!(
                        "group {g} does not belong to tenant {t}"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn require_feature(&self, feature: &str) -> Result<&Feature, AccessError> {
        self.features
            .get(feature)
            .ok_or_else(|| AccessError::UnknownFeature(feature.to_string()))
    }

    /// The scope a mutation addresses: the group if given, else the tenant,
    /// else the global row.
    pub fn target(
        &self,
        feature: &str,
        tenant_id: Option<i64>,
        group_id: Option<i64>,
    ) -> Result<Scope, AccessError> {
        self.require_feature(feature)?;
        self.check_scope(tenant_id, group_id)?;
        Ok(match (tenant_id, group_id) {
            (_, Some(g)) => Scope::Group(g),
            (Some(t), None) => Scope::Tenant(t),
            (None, None) => Scope::Global,
        })
    }

    pub fn grant_state(&self, feature: &str, tenant_id: i64) -> GrantState {
        match self.grants.get(&(feature.to_string(), tenant_id)) {
            Some(&granted) => GrantState {
                granted,
                explicit: true,
            },
            None => GrantState {
                granted: true,
                explicit: false,
            },
        }
    }

    fn override_value(&self, feature: &str, scope: Scope, role: RoleClass) -> Option<bool> {
        self.overrides
            .get(&(feature.to_string(), scope, role))
            .copied()
    }

    pub fn resolve(
        &self,
        feature: &str,
        tenant_id: Option<i64>,
        group_id: Option<i64>,
        role: RoleClass,
    ) -> Result<ResolvedAccess, AccessError> {
        let feat = self.require_feature(feature)?;
        self.check_scope(tenant_id, group_id)?;

        if let Some(t) = tenant_id {
            if !self.grant_state(feature, t).granted {
                return Ok(ResolvedAccess {
                    value: false,
                    source: Source::Tenant,
                    explicit: true,
                });
            }
        }

        let chain = group_id
            .map(Scope::Group)
            .into_iter()
            .chain(tenant_id.map(Scope::Tenant))
            .chain(std::iter::once(Scope::Global));
        for scope in chain {
            if let Some(value) = self.override_value(feature, scope, role) {
                return Ok(ResolvedAccess {
                    value,
                    source: scope.source(),
                    explicit: true,
                });
            }
        }

        Ok(ResolvedAccess {
            value: feat.default_enabled,
            source: Source::Default,
            explicit: false,
        })
    }

    fn role_cells(
        &self,
        feature: &str,
        tenant_id: Option<i64>,
        group_id: Option<i64>,
    ) -> Result<RoleCells, AccessError> {
        RoleClass::ALL
            .iter()
            .map(|&r| {
                self.resolve(feature, tenant_id, group_id, r)
                    .map(|cell| (r, cell))
            })
            .collect()
    }

    /// One row per feature; one column per school (just `tenant_id` when
    /// given) with a cell per cohort and role class.
    pub fn build_matrix(&self, tenant_id: Option<i64>) -> Result<Matrix, AccessError> {
        let mut tenants: Vec<&Tenant> = match tenant_id {
            Some(t) => {
                let tenant = self
                    .tenants
                    .get(&t)
                    .ok_or_else(|| AccessError::InvalidScope(format!("unknown tenant {t}")))?;
                vec![tenant]
            }
            None => self.tenants.values().collect(),
        };
        tenants.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let mut groups_by_tenant: BTreeMap<i64, Vec<&Group>> = BTreeMap::new();
        for g in self.groups.values() {
            groups_by_tenant.entry(g.tenant_id).or_default().push(g);
        }
        for list in groups_by_tenant.values_mut() {
            list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        }

        let mut features: Vec<&Feature> = self.features.values().collect();
        features.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.id.cmp(&b.id)));

        let mut rows = Vec::with_capacity(features.len());
        for f in features {
            let mut columns = Vec::with_capacity(tenants.len());
            for t in &tenants {
                let mut groups = Vec::new();
                for g in groups_by_tenant.get(&t.id).map(Vec::as_slice).unwrap_or(&[]) {
                    groups.push(GroupColumn {
                        group_id: g.id,
                        name: g.name.clone(),
                        roles: self.role_cells(&f.id, Some(t.id), Some(g.id))?,
                    });
                }
                columns.push(TenantColumn {
                    tenant_id: t.id,
                    name: t.name.clone(),
                    grant: self.grant_state(&f.id, t.id),
                    roles: self.role_cells(&f.id, Some(t.id), None)?,
                    groups,
                });
            }
            rows.push(FeatureRow {
                feature: f.clone(),
                global: self.role_cells(&f.id, None, None)?,
                tenants: columns,
            });
        }

        Ok(Matrix {
            tenant_id,
            role_classes: RoleClass::ALL.to_vec(),
            features: rows,
        })
    }
}

/// Upserts one override row. Concurrent writers race; the last one wins.
pub fn set_override(
    conn: &Connection,
    feature: &str,
    scope: Scope,
    role: RoleClass,
    value: bool,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO feature_overrides(id, feature_id, scope, scope_id, role_class, enabled, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(feature_id, scope, scope_id, role_class)
         DO UPDATE SET enabled = excluded.enabled, updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            feature,
            scope.kind(),
            scope.scope_id(),
            role.as_str(),
            value as i64,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

/// Deletes the override stored at exactly `scope`; other scopes are untouched.
pub fn reset_override(
    conn: &Connection,
    feature: &str,
    scope: Scope,
    role: RoleClass,
) -> anyhow::Result<usize> {
    let n = conn.execute(
        "DELETE FROM feature_overrides
         WHERE feature_id = ? AND scope = ? AND scope_id = ? AND role_class = ?",
        (feature, scope.kind(), scope.scope_id(), role.as_str()),
    )?;
    Ok(n)
}

/// `None` clears the gate, which reads as granted.
pub fn set_grant(
    conn: &Connection,
    feature: &str,
    tenant_id: i64,
    granted: Option<bool>,
) -> anyhow::Result<()> {
    match granted {
        Some(g) => {
            conn.execute(
                "INSERT INTO feature_grants(feature_id, tenant_id, granted, updated_at)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(feature_id, tenant_id)
                 DO UPDATE SET granted = excluded.granted, updated_at = excluded.updated_at",
                (feature, tenant_id, g as i64, Utc::now().to_rfc3339()),
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM feature_grants WHERE feature_id = ? AND tenant_id = ?",
                (feature, tenant_id),
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: RoleClass = RoleClass::Teacher;
    const S: RoleClass = RoleClass::Student;

    impl AccessSnapshot {
        fn with_feature(mut self, id: &str, default_enabled: bool) -> Self {
            let sort_order = self.features.len() as i64;
            self.features.insert(
                id.to_string(),
                Feature {
                    id: id.to_string(),
                    name: id.to_string(),
                    default_enabled,
                    sort_order,
                },
            );
            self
        }

        fn with_tenant(mut self, id: i64, name: &str) -> Self {
            self.tenants.insert(
                id,
                Tenant {
                    id,
                    name: name.to_string(),
                    short_name: None,
                    top_category_id: None,
                },
            );
            self
        }

        fn with_group(mut self, id: i64, tenant_id: i64, name: &str) -> Self {
            self.groups.insert(
                id,
                Group {
                    id,
                    tenant_id,
                    name: name.to_string(),
                },
            );
            self
        }

        fn with_grant(mut self, feature: &str, tenant_id: i64, granted: bool) -> Self {
            self.grants.insert((feature.to_string(), tenant_id), granted);
            self
        }

        fn with_override(
            mut self,
            feature: &str,
            scope: Scope,
            role: RoleClass,
            value: bool,
        ) -> Self {
            self.overrides
                .insert((feature.to_string(), scope, role), value);
            self
        }
    }

    impl Matrix {
        /// Number of (feature, group, role) cells.
        fn group_cell_count(&self) -> usize {
            self.features
                .iter()
                .flat_map(|f| f.tenants.iter())
                .flat_map(|t| t.groups.iter())
                .map(|g| g.roles.len())
                .sum()
        }
    }

    fn school() -> AccessSnapshot {
        AccessSnapshot::new()
            .with_feature("code_editor", true)
            .with_feature("scratch_editor", false)
            .with_tenant(1, "North School")
            .with_tenant(2, "South School")
            .with_group(10, 1, "Grade 4")
            .with_group(11, 1, "Grade 5")
            .with_group(20, 2, "Grade 4")
    }

    #[test]
    fn falls_back_to_feature_default() {
        let snap = school();
        let r = snap.resolve("scratch_editor", Some(1), Some(10), S).expect("resolve");
        assert_eq!(
            r,
            ResolvedAccess {
                value: false,
                source: Source::Default,
                explicit: false
            }
        );
    }

    #[test]
    fn group_override_wins_over_every_other_scope() {
        let snap = school()
            .with_override("code_editor", Scope::Global, S, true)
            .with_override("code_editor", Scope::Tenant(1), S, true)
            .with_override("code_editor", Scope::Group(10), S, false);
        let r = snap.resolve("code_editor", Some(1), Some(10), S).expect("resolve");
        assert_eq!(r.source, Source::Group);
        assert!(!r.value);
        assert!(r.explicit);

        // Sibling cohort without its own row inherits the tenant value.
        let r = snap.resolve("code_editor", Some(1), Some(11), S).expect("resolve");
        assert_eq!(r.source, Source::Tenant);
        assert!(r.value);
    }

    #[test]
    fn role_classes_resolve_independently() {
        let snap = school().with_override("scratch_editor", Scope::Group(10), T, true);
        let t = snap.resolve("scratch_editor", Some(1), Some(10), T).expect("resolve");
        let s = snap.resolve("scratch_editor", Some(1), Some(10), S).expect("resolve");
        assert_eq!((t.value, t.source), (true, Source::Group));
        assert_eq!((s.value, s.source), (false, Source::Default));
    }

    #[test]
    fn denied_grant_suppresses_group_overrides() {
        let snap = school()
            .with_override("code_editor", Scope::Group(10), T, true)
            .with_override("code_editor", Scope::Tenant(1), T, true)
            .with_grant("code_editor", 1, false);
        for group in [None, Some(10), Some(11)] {
            for role in RoleClass::ALL {
                let r = snap.resolve("code_editor", Some(1), group, role).expect("resolve");
                assert_eq!(
                    r,
                    ResolvedAccess {
                        value: false,
                        source: Source::Tenant,
                        explicit: true
                    }
                );
            }
        }
        // Other schools are unaffected.
        let r = snap.resolve("code_editor", Some(2), Some(20), T).expect("resolve");
        assert_eq!(r.source, Source::Default);
        assert!(r.value);
    }

    #[test]
    fn explicit_grant_true_does_not_mask_overrides() {
        let snap = school()
            .with_grant("scratch_editor", 1, true)
            .with_override("scratch_editor", Scope::Tenant(1), S, true);
        let r = snap.resolve("scratch_editor", Some(1), Some(10), S).expect("resolve");
        assert_eq!((r.value, r.source), (true, Source::Tenant));
        assert_eq!(
            snap.grant_state("scratch_editor", 1),
            GrantState {
                granted: true,
                explicit: true
            }
        );
        assert!(!snap.grant_state("scratch_editor", 2).explicit);
    }

    #[test]
    fn global_scope_ignores_tenant_rows() {
        let snap = school()
            .with_override("scratch_editor", Scope::Global, T, true)
            .with_override("scratch_editor", Scope::Tenant(1), T, false);
        let r = snap.resolve("scratch_editor", None, None, T).expect("resolve");
        assert_eq!((r.value, r.source), (true, Source::Global));
        let r = snap.resolve("scratch_editor", Some(2), None, T).expect("resolve");
        assert_eq!((r.value, r.source), (true, Source::Global));
    }

    #[test]
    fn removing_group_row_falls_through_to_tenant_chain() {
        let base = school()
            .with_override("code_editor", Scope::Tenant(1), T, false)
            .with_override("code_editor", Scope::Global, T, true);
        let with_group = base
            .clone()
            .with_override("code_editor", Scope::Group(10), T, true);
        assert_eq!(
            with_group
                .resolve("code_editor", Some(1), Some(10), T)
                .expect("resolve")
                .source,
            Source::Group
        );

        let expected = base.resolve("code_editor", Some(1), None, T).expect("resolve");
        let after = base.resolve("code_editor", Some(1), Some(10), T).expect("resolve");
        assert_eq!(after, expected);
        assert_eq!((after.value, after.source), (false, Source::Tenant));
    }

    #[test]
    fn scope_and_feature_validation() {
        let snap = school();
        assert_eq!(
            snap.resolve("nope", Some(1), None, T),
            Err(AccessError::UnknownFeature("nope".into()))
        );
        let e = snap.resolve("code_editor", Some(2), Some(10), T).expect_err("scope");
        assert_eq!(e.code(), "invalid_scope");
        let e = snap.resolve("code_editor", None, Some(10), T).expect_err("scope");
        assert_eq!(e.code(), "invalid_scope");
        let e = snap.resolve("code_editor", Some(99), None, T).expect_err("scope");
        assert_eq!(e.code(), "invalid_scope");
        let e = snap.build_matrix(Some(99)).expect_err("scope");
        assert_eq!(e.code(), "invalid_scope");
    }

    #[test]
    fn target_picks_most_specific_scope() {
        let snap = school();
        assert_eq!(
            snap.target("code_editor", Some(1), Some(11)),
            Ok(Scope::Group(11))
        );
        assert_eq!(snap.target("code_editor", Some(1), None), Ok(Scope::Tenant(1)));
        assert_eq!(snap.target("code_editor", None, None), Ok(Scope::Global));
        assert!(snap.target("missing", None, None).is_err());
    }

    #[test]
    fn matrix_has_one_cell_per_feature_group_and_role() {
        let snap = school().with_grant("code_editor", 1, false);

        let m = snap.build_matrix(Some(1)).expect("matrix");
        assert_eq!(m.features.len(), 2);
        assert_eq!(m.group_cell_count(), 2 * 2 * 2);
        let mut seen = std::collections::HashSet::new();
        for row in &m.features {
            assert_eq!(row.tenants.len(), 1);
            for t in &row.tenants {
                for g in &t.groups {
                    for role in g.roles.keys() {
                        assert!(seen.insert((row.feature.id.clone(), g.group_id, *role)));
                    }
                }
            }
        }
        let code = &m.features[0];
        assert_eq!(code.feature.id, "code_editor");
        assert!(!code.tenants[0].grant.granted);
        assert!(code.tenants[0].groups.iter().all(|g| g.roles.values().all(|c| !c.value)));

        let all = snap.build_matrix(None).expect("matrix");
        assert_eq!(all.group_cell_count(), 2 * 3 * 2);
        let names: Vec<&str> = all.features[0]
            .tenants
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["North School", "South School"]);
    }

    #[test]
    fn matrix_cells_serialize_with_lowercase_tags() {
        let snap = school().with_override("code_editor", Scope::Group(20), S, false);
        let m = snap.build_matrix(Some(2)).expect("matrix");
        let v = serde_json::to_value(&m).expect("json");
        assert_eq!(
            v.pointer("/features/0/tenants/0/groups/0/roles/student/source")
                .and_then(|s| s.as_str()),
            Some("group")
        );
        assert_eq!(
            v.pointer("/features/0/global/teacher/source")
                .and_then(|s| s.as_str()),
            Some("default")
        );
        assert_eq!(v.get("tenantId").and_then(|t| t.as_i64()), Some(2));
    }
}
