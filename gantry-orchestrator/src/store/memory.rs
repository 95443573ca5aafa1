//! In-memory store
//!
//! A process-local implementation of every storage trait. Each operation
//! runs under one lock, which gives admission and save the same atomicity
//! the PostgreSQL store gets from its transactions. Used by
//! `GANTRY_STORE=memory` and as the test double for the services.

use async_trait::async_trait;
use chrono::Utc;
use gantry_core::admission::{Admission, AdmissionDecision, AdmissionRequest, decide};
use gantry_core::domain::build::{Build, BuildEvent, BuildStatus};
use gantry_core::domain::pipeline::{
    ConfigVersion, InstanceVars, Pipeline, PipelineRef, ResourceConfig, ResourceTypeConfig, Team,
};
use gantry_core::domain::resource::{Checkable, CheckableKey, Resource, ResourceType};
use gantry_core::resolver::ResourceTypes;
use gantry_core::scope::ScopeKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{BuildLedger, CheckableStore, ConfigStore, SavePipeline, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Stored<T> {
    record: T,
    active: bool,
    position: usize,
}

#[derive(Debug, Default)]
struct State {
    teams: Vec<Team>,
    pipelines: Vec<Pipeline>,
    resource_types: Vec<Stored<ResourceType>>,
    resources: Vec<Stored<Resource>>,
    /// Scope id by digest
    scopes: HashMap<String, Uuid>,
    builds: HashMap<Uuid, Build>,
    events: HashMap<Uuid, Vec<BuildEvent>>,
}

#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with the `main` team.
    pub fn new() -> Self {
        let store = Self {
            state: Mutex::new(State::default()),
        };
        store.create_team("main");
        store
    }

    pub fn create_team(&self, name: &str) -> Team {
        let mut state = self.state.lock();
        if let Some(team) = state.teams.iter().find(|t| t.name == name) {
            return team.clone();
        }
        let team = Team {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        state.teams.push(team.clone());
        team
    }

    pub fn pause_pipeline(&self, pipeline_id: Uuid, paused: bool) -> StoreResult<()> {
        let mut state = self.state.lock();
        let pipeline = state
            .pipelines
            .iter_mut()
            .find(|p| p.id == pipeline_id)
            .ok_or(StoreError::PipelineNotFound(pipeline_id))?;
        pipeline.paused = paused;
        Ok(())
    }
}

fn same_instance(a: &Option<InstanceVars>, b: &Option<InstanceVars>) -> bool {
    let a = a.as_ref().filter(|v| !v.is_empty());
    let b = b.as_ref().filter(|v| !v.is_empty());
    a == b
}

impl State {
    fn upsert_resource_type(&mut self, pipeline: &Pipeline, config: &ResourceTypeConfig, position: usize) {
        let existing = self
            .resource_types
            .iter_mut()
            .find(|t| t.record.pipeline_id == pipeline.id && t.record.name == config.name);

        let id = existing.as_ref().map(|t| t.record.id).unwrap_or_else(Uuid::new_v4);
        let scope = existing.as_ref().and_then(|t| t.record.resource_config_scope_id);
        let record = ResourceType {
            id,
            pipeline_id: pipeline.id,
            pipeline_name: pipeline.name.clone(),
            pipeline_instance_vars: pipeline.instance_vars.clone(),
            team_id: pipeline.team_id,
            team_name: pipeline.team_name.clone(),
            name: config.name.clone(),
            type_: config.type_.clone(),
            source: config.source.clone(),
            defaults: config.defaults.clone(),
            privileged: config.privileged,
            params: config.params.clone(),
            tags: config.tags.clone(),
            check_every: config.check_every,
            pinned_version: config.version.clone(),
            version: None,
            resource_config_scope_id: scope,
        };

        match existing {
            Some(stored) => {
                stored.record = record;
                stored.active = true;
                stored.position = position;
            }
            None => self.resource_types.push(Stored {
                record,
                active: true,
                position,
            }),
        }
    }

    fn upsert_resource(&mut self, pipeline: &Pipeline, config: &ResourceConfig, position: usize) {
        let existing = self
            .resources
            .iter_mut()
            .find(|r| r.record.pipeline_id == pipeline.id && r.record.name == config.name);

        let id = existing.as_ref().map(|r| r.record.id).unwrap_or_else(Uuid::new_v4);
        let scope = existing.as_ref().and_then(|r| r.record.resource_config_scope_id);
        let record = Resource {
            id,
            pipeline_id: pipeline.id,
            pipeline_name: pipeline.name.clone(),
            pipeline_instance_vars: pipeline.instance_vars.clone(),
            team_id: pipeline.team_id,
            team_name: pipeline.team_name.clone(),
            name: config.name.clone(),
            type_: config.type_.clone(),
            source: config.source.clone(),
            tags: config.tags.clone(),
            check_every: config.check_every,
            pinned_version: config.version.clone(),
            icon: config.icon.clone(),
            resource_config_scope_id: scope,
        };

        match existing {
            Some(stored) => {
                stored.record = record;
                stored.active = true;
                stored.position = position;
            }
            None => self.resources.push(Stored {
                record,
                active: true,
                position,
            }),
        }
    }

    fn scope_id(&mut self, digest: String) -> Uuid {
        *self.scopes.entry(digest).or_insert_with(Uuid::new_v4)
    }

    /// Links every active checkable of a pipeline to the scope of its
    /// effective configuration.
    fn assign_scopes(&mut self, pipeline_id: Uuid, save: &SavePipeline<'_>) -> StoreResult<()> {
        let types = self.active_types(|t| t.pipeline_id == pipeline_id);

        for i in 0..self.resource_types.len() {
            let stored = &self.resource_types[i];
            if !stored.active || stored.record.pipeline_id != pipeline_id {
                continue;
            }
            let checkable = Checkable::ResourceType(stored.record.clone());
            let digest = ScopeKey::for_checkable(&checkable, &types, save.base_defaults).digest()?;
            let scope = self.scope_id(digest);
            self.resource_types[i].record.resource_config_scope_id = Some(scope);
        }

        for i in 0..self.resources.len() {
            let stored = &self.resources[i];
            if !stored.active || stored.record.pipeline_id != pipeline_id {
                continue;
            }
            let checkable = Checkable::Resource(stored.record.clone());
            let digest = ScopeKey::for_checkable(&checkable, &types, save.base_defaults).digest()?;
            let scope = self.scope_id(digest);
            self.resources[i].record.resource_config_scope_id = Some(scope);
        }
        Ok(())
    }

    fn active_types(&self, keep: impl Fn(&ResourceType) -> bool) -> ResourceTypes {
        let mut stored: Vec<&Stored<ResourceType>> = self
            .resource_types
            .iter()
            .filter(|t| t.active && keep(&t.record))
            .collect();
        stored.sort_by_key(|t| (t.record.pipeline_id, t.position));
        ResourceTypes::new(stored.into_iter().map(|t| t.record.clone()).collect())
    }

    fn checkable_exists(&self, key: CheckableKey) -> bool {
        match key {
            CheckableKey::Resource(id) => self.resources.iter().any(|r| r.active && r.record.id == id),
            CheckableKey::ResourceType(id) => self
                .resource_types
                .iter()
                .any(|t| t.active && t.record.id == id),
        }
    }

    fn sorted_pipelines(&self, keep: impl Fn(&Pipeline) -> bool) -> Vec<Pipeline> {
        let mut pipelines: Vec<Pipeline> = self.pipelines.iter().filter(|p| keep(p)).cloned().collect();
        pipelines.sort_by_key(|p| (p.team_id, p.ordering, p.id));
        pipelines
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn find_team(&self, name: &str) -> StoreResult<Option<Team>> {
        let state = self.state.lock();
        Ok(state.teams.iter().find(|t| t.name == name).cloned())
    }

    async fn save_pipeline(&self, save: SavePipeline<'_>) -> StoreResult<(Pipeline, bool)> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let existing = state.pipelines.iter_mut().find(|p| {
            p.team_id == save.team.id
                && p.name == save.pipeline_ref.name
                && same_instance(&p.instance_vars, &save.pipeline_ref.instance_vars)
        });

        let (pipeline, created) = match existing {
            Some(pipeline) => {
                if pipeline.config_version != save.from_version {
                    return Err(StoreError::ConfigVersionConflict {
                        expected: save.from_version,
                        actual: pipeline.config_version,
                    });
                }
                pipeline.config_version = ConfigVersion(pipeline.config_version.0 + 1);
                pipeline.updated_at = now;
                (pipeline.clone(), false)
            }
            None => {
                let ordering = state
                    .pipelines
                    .iter()
                    .filter(|p| p.team_id == save.team.id)
                    .map(|p| p.ordering)
                    .max()
                    .unwrap_or(0)
                    + 1;
                let pipeline = Pipeline {
                    id: Uuid::new_v4(),
                    team_id: save.team.id,
                    team_name: save.team.name.clone(),
                    name: save.pipeline_ref.name.clone(),
                    instance_vars: save.pipeline_ref.instance_vars.clone().filter(|v| !v.is_empty()),
                    config_version: ConfigVersion(1),
                    paused: save.initially_paused,
                    public: false,
                    ordering,
                    created_at: now,
                    updated_at: now,
                };
                state.pipelines.push(pipeline.clone());
                (pipeline, true)
            }
        };

        for t in state.resource_types.iter_mut().filter(|t| t.record.pipeline_id == pipeline.id) {
            t.active = false;
        }
        for r in state.resources.iter_mut().filter(|r| r.record.pipeline_id == pipeline.id) {
            r.active = false;
        }
        for (position, config) in save.config.resource_types.iter().enumerate() {
            state.upsert_resource_type(&pipeline, config, position);
        }
        for (position, config) in save.config.resources.iter().enumerate() {
            state.upsert_resource(&pipeline, config, position);
        }
        state.assign_scopes(pipeline.id, &save)?;

        Ok((pipeline, created))
    }

    async fn find_pipeline(&self, team: &Team, pipeline_ref: &PipelineRef) -> StoreResult<Option<Pipeline>> {
        let state = self.state.lock();
        Ok(state
            .pipelines
            .iter()
            .find(|p| {
                p.team_id == team.id
                    && p.name == pipeline_ref.name
                    && same_instance(&p.instance_vars, &pipeline_ref.instance_vars)
            })
            .cloned())
    }

    async fn all_pipelines(&self) -> StoreResult<Vec<Pipeline>> {
        Ok(self.state.lock().sorted_pipelines(|_| true))
    }

    async fn visible_pipelines(&self, team_names: &[String]) -> StoreResult<Vec<Pipeline>> {
        let state = self.state.lock();
        Ok(state.sorted_pipelines(|p| p.public || team_names.contains(&p.team_name)))
    }

    async fn set_pipeline_public(&self, pipeline_id: Uuid, public: bool) -> StoreResult<()> {
        let mut state = self.state.lock();
        let pipeline = state
            .pipelines
            .iter_mut()
            .find(|p| p.id == pipeline_id)
            .ok_or(StoreError::PipelineNotFound(pipeline_id))?;
        pipeline.public = public;
        Ok(())
    }
}

#[async_trait]
impl CheckableStore for MemoryStore {
    async fn resources(&self) -> StoreResult<Vec<Resource>> {
        let state = self.state.lock();
        let mut stored: Vec<&Stored<Resource>> = state
            .resources
            .iter()
            .filter(|r| r.active)
            .filter(|r| {
                state
                    .pipelines
                    .iter()
                    .any(|p| p.id == r.record.pipeline_id && !p.paused)
            })
            .collect();
        stored.sort_by_key(|r| (r.record.pipeline_id, r.position));
        Ok(stored.into_iter().map(|r| r.record.clone()).collect())
    }

    async fn resource_types(&self) -> StoreResult<ResourceTypes> {
        Ok(self.state.lock().active_types(|_| true))
    }

    async fn find_resource(&self, pipeline_id: Uuid, name: &str) -> StoreResult<Option<Resource>> {
        let state = self.state.lock();
        Ok(state
            .resources
            .iter()
            .find(|r| r.active && r.record.pipeline_id == pipeline_id && r.record.name == name)
            .map(|r| r.record.clone()))
    }

    async fn find_resource_type(&self, pipeline_id: Uuid, name: &str) -> StoreResult<Option<ResourceType>> {
        let state = self.state.lock();
        Ok(state
            .resource_types
            .iter()
            .find(|t| t.active && t.record.pipeline_id == pipeline_id && t.record.name == name)
            .map(|t| t.record.clone()))
    }

    async fn pipeline_resource_types(&self, pipeline_id: Uuid) -> StoreResult<ResourceTypes> {
        Ok(self.state.lock().active_types(|t| t.pipeline_id == pipeline_id))
    }
}

#[async_trait]
impl BuildLedger for MemoryStore {
    async fn admit(&self, request: AdmissionRequest) -> StoreResult<Admission> {
        let mut state = self.state.lock();
        if !state.checkable_exists(request.checkable) {
            return Err(StoreError::CheckableNotFound(request.checkable));
        }

        let existing: Vec<Build> = state
            .builds
            .values()
            .filter(|b| b.checkable == request.checkable)
            .cloned()
            .collect();

        match decide(&existing, request.manually_triggered) {
            AdmissionDecision::Existing(build) => Ok(Admission { build, created: false }),
            AdmissionDecision::Create { superseded } => {
                for id in superseded {
                    state.builds.remove(&id);
                    state.events.remove(&id);
                }
                let build = request.new_build();
                state
                    .events
                    .insert(build.id, vec![BuildEvent::status(build.id, build.status)]);
                state.builds.insert(build.id, build.clone());
                Ok(Admission { build, created: true })
            }
        }
    }

    async fn find_build(&self, id: Uuid) -> StoreResult<Option<Build>> {
        Ok(self.state.lock().builds.get(&id).cloned())
    }

    async fn builds_for(&self, checkable: CheckableKey) -> StoreResult<Vec<Build>> {
        let state = self.state.lock();
        let mut builds: Vec<Build> = state
            .builds
            .values()
            .filter(|b| b.checkable == checkable)
            .cloned()
            .collect();
        builds.sort_by_key(|b| b.create_time);
        Ok(builds)
    }

    async fn finish_build(&self, id: Uuid, status: BuildStatus) -> StoreResult<Build> {
        let mut state = self.state.lock();
        let build = state.builds.get_mut(&id).ok_or(StoreError::BuildNotFound(id))?;
        if build.status.is_terminal() {
            return Err(StoreError::BuildAlreadyFinished(id));
        }
        build.status = status;
        build.end_time = Some(Utc::now());
        let build = build.clone();

        state
            .events
            .entry(id)
            .or_default()
            .push(BuildEvent::status(id, status));
        Ok(build)
    }

    async fn build_events(&self, id: Uuid) -> StoreResult<Vec<BuildEvent>> {
        let state = self.state.lock();
        if !state.builds.contains_key(&id) {
            return Err(StoreError::BuildNotFound(id));
        }
        Ok(state.events.get(&id).cloned().unwrap_or_default())
    }
}
