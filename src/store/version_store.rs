//! Version store: tools, their append-only version log, and the active
//! pointer table.
//!
//! Every mutation of a tool's records happens inside that tool's own lock;
//! distinct tools never contend. Reads go straight to storage.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use super::records::{
    ACTIVE, ActivePointer, LIFECYCLE, Lifecycle, TOOLS, VERSIONS, VersionRecord, assemble,
};
use crate::domain::{
    AuditVerdict, ExecutionResult, GeneratedBy, Signature, Tool, ToolStatus, Version, VersionState,
    source_digest,
};
use crate::error::{AnvilError, Result};
use crate::id::{now_ms, version_id};
use crate::storage::{Filter, JsonlStorage, Storage};

pub struct VersionStore {
    storage: Arc<JsonlStorage>,
    tool_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> AnvilError {
    AnvilError::Storage(format!("lock poisoned: {}", e))
}

impl VersionStore {
    /// Open the store under a data directory and validate its invariants
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_storage(Arc::new(JsonlStorage::new(path)?))
    }

    /// Wrap existing storage and validate its invariants
    pub fn with_storage(storage: Arc<JsonlStorage>) -> Result<Self> {
        let store = Self {
            storage,
            tool_locks: Mutex::new(HashMap::new()),
        };
        store.validate()?;
        Ok(store)
    }

    pub fn storage(&self) -> Arc<JsonlStorage> {
        Arc::clone(&self.storage)
    }

    fn tool_lock(&self, tool: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.tool_locks.lock().map_err(poisoned)?;
        Ok(Arc::clone(locks.entry(tool.to_string()).or_default()))
    }

    // ------------------------------------------------------------------
    // Tools
    // ------------------------------------------------------------------

    /// Create a tool if absent
    ///
    /// Re-registering with the identical intent and signature is a no-op
    /// (and reactivates a deactivated tool); a conflicting contract fails
    /// with `AlreadyExists`.
    pub fn register(&self, name: &str, intent: &str, signature: &Signature) -> Result<Tool> {
        let lock = self.tool_lock(name)?;
        let _guard = lock.lock().map_err(poisoned)?;

        match self.storage.get::<Tool>(TOOLS, name)? {
            Some(mut tool) if tool.same_contract(intent, signature) => {
                if tool.deactivated {
                    info!("Reactivating tool {}", name);
                    tool.deactivated = false;
                    tool.updated_at = now_ms();
                    self.storage.update(TOOLS, &tool)?;
                }
                Ok(tool)
            }
            Some(_) => Err(AnvilError::AlreadyExists(format!(
                "{} is registered with a different intent or signature",
                name
            ))),
            None => {
                let tool = Tool::new(name, intent, signature.clone());
                self.storage.create(TOOLS, &tool)?;
                info!("Registered tool {} {}", name, signature);
                Ok(tool)
            }
        }
    }

    /// Get a tool record, deactivated or not
    pub fn get_tool(&self, name: &str) -> Result<Tool> {
        self.storage
            .get(TOOLS, name)?
            .ok_or_else(|| AnvilError::UnknownTool(name.to_string()))
    }

    /// Get a tool that still accepts new versions
    fn live_tool(&self, name: &str) -> Result<Tool> {
        let tool = self.get_tool(name)?;
        if tool.deactivated {
            return Err(AnvilError::UnknownTool(format!("{} (deactivated)", name)));
        }
        Ok(tool)
    }

    pub fn list_tools(&self) -> Result<Vec<Tool>> {
        self.storage.list(TOOLS)
    }

    pub fn set_status(&self, name: &str, status: ToolStatus) -> Result<()> {
        let lock = self.tool_lock(name)?;
        let _guard = lock.lock().map_err(poisoned)?;

        let mut tool = self.get_tool(name)?;
        if tool.status != status {
            debug!("Tool {} status {} -> {}", name, tool.status, status);
            tool.status = status;
            tool.updated_at = now_ms();
            self.storage.update(TOOLS, &tool)?;
        }
        Ok(())
    }

    /// Stop accepting versions for a tool; history stays on disk
    pub fn deactivate(&self, name: &str) -> Result<()> {
        let lock = self.tool_lock(name)?;
        let _guard = lock.lock().map_err(poisoned)?;

        let mut tool = self.get_tool(name)?;
        if !tool.deactivated {
            tool.deactivated = true;
            tool.updated_at = now_ms();
            self.storage.update(TOOLS, &tool)?;
            info!("Deactivated tool {}", name);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Versions
    // ------------------------------------------------------------------

    /// Append a new Candidate version with the next sequence number
    pub fn append_candidate(&self, tool: &str, source: &str, generated_by: GeneratedBy) -> Result<Version> {
        let lock = self.tool_lock(tool)?;
        let _guard = lock.lock().map_err(poisoned)?;

        self.live_tool(tool)?;

        let sequence = self
            .version_records(tool)?
            .iter()
            .map(|r| r.sequence)
            .max()
            .unwrap_or(0)
            + 1;
        let now = now_ms();
        let record = VersionRecord {
            id: version_id(tool, sequence),
            tool: tool.to_string(),
            sequence,
            source: source.to_string(),
            digest: source_digest(source),
            generated_by,
            created_at: now,
        };
        let lifecycle = Lifecycle {
            id: record.id.clone(),
            tool: tool.to_string(),
            state: VersionState::Candidate,
            verification: None,
            audit: None,
            updated_at: now,
        };

        self.storage.create(VERSIONS, &record)?;
        self.storage.create(LIFECYCLE, &lifecycle)?;
        debug!("Appended candidate {} ({})", record.id, generated_by);

        Ok(assemble(record, lifecycle))
    }

    /// Candidate -> Verified on success, Candidate -> Rejected otherwise
    pub fn mark_verified(&self, version_id: &str, result: ExecutionResult) -> Result<Version> {
        self.transition(version_id, VersionState::Candidate, |lc| {
            lc.state = if result.is_success() {
                VersionState::Verified
            } else {
                VersionState::Rejected
            };
            lc.verification = Some(result);
        })
    }

    /// Verified -> Audited on approval, Verified -> Rejected otherwise
    pub fn mark_audited(&self, version_id: &str, verdict: AuditVerdict) -> Result<Version> {
        self.transition(version_id, VersionState::Verified, |lc| {
            lc.state = if verdict.is_approved() {
                VersionState::Audited
            } else {
                VersionState::Rejected
            };
            lc.audit = Some(verdict);
        })
    }

    /// Mark a version Rejected regardless of its pre-promotion state
    ///
    /// Used when a run aborts after its candidate was appended but before
    /// the lifecycle reached a terminal state.
    pub fn reject(&self, version_id: &str) -> Result<Version> {
        let tool = self.lifecycle(version_id)?.tool;
        let lock = self.tool_lock(&tool)?;
        let _guard = lock.lock().map_err(poisoned)?;

        let mut lc = self.lifecycle(version_id)?;
        match lc.state {
            VersionState::Candidate | VersionState::Verified | VersionState::Audited => {
                lc.state = VersionState::Rejected;
                lc.updated_at = now_ms();
                self.storage.update(LIFECYCLE, &lc)?;
            }
            VersionState::Rejected => {}
            other => {
                return Err(AnvilError::InvalidTransition(format!(
                    "{} is {}, cannot reject",
                    version_id, other
                )));
            }
        }
        self.get_version(version_id)
    }

    fn transition<F>(&self, version_id: &str, from: VersionState, apply: F) -> Result<Version>
    where
        F: FnOnce(&mut Lifecycle),
    {
        let tool = self.lifecycle(version_id)?.tool;
        let lock = self.tool_lock(&tool)?;
        let _guard = lock.lock().map_err(poisoned)?;

        let mut lc = self.lifecycle(version_id)?;
        if lc.state != from {
            return Err(AnvilError::InvalidTransition(format!(
                "{} is {}, expected {}",
                version_id, lc.state, from
            )));
        }
        apply(&mut lc);
        lc.updated_at = now_ms();
        self.storage.update(LIFECYCLE, &lc)?;
        debug!("Version {} {} -> {}", version_id, from, lc.state);

        self.get_version(version_id)
    }

    /// Make an Audited version Active, superseding the prior Active one
    ///
    /// Promoting the version that is already Active is a no-op.
    pub fn promote(&self, version_id: &str) -> Result<Version> {
        self.activate(version_id, VersionState::Audited)
    }

    /// Re-promote a Superseded version, superseding the current Active one
    pub fn restore(&self, version_id: &str) -> Result<Version> {
        self.activate(version_id, VersionState::Superseded)
    }

    fn activate(&self, version_id: &str, from: VersionState) -> Result<Version> {
        let tool = self.lifecycle(version_id)?.tool;
        let lock = self.tool_lock(&tool)?;
        let _guard = lock.lock().map_err(poisoned)?;

        self.live_tool(&tool)?;

        let mut lc = self.lifecycle(version_id)?;
        if lc.state == VersionState::Active {
            debug!("Version {} is already active", version_id);
            return self.get_version(version_id);
        }
        if lc.state != from {
            return Err(AnvilError::InvalidTransition(format!(
                "{} is {}, expected {}",
                version_id, lc.state, from
            )));
        }

        let now = now_ms();
        let mut changed = Vec::with_capacity(2);
        let prior = self.storage.get::<ActivePointer>(ACTIVE, &tool)?;
        if let Some(pointer) = &prior {
            let mut prev = self.lifecycle(&pointer.version_id)?;
            prev.state = VersionState::Superseded;
            prev.updated_at = now;
            changed.push(prev);
        }
        lc.state = VersionState::Active;
        lc.updated_at = now;
        changed.push(lc);

        // The pointer is the commit record; open() finishes the lifecycle
        // update if we stop between the two writes
        let record = self.version_record(version_id)?;
        self.storage.upsert(
            ACTIVE,
            &ActivePointer {
                id: tool.clone(),
                version_id: version_id.to_string(),
                sequence: record.sequence,
                updated_at: now,
            },
        )?;
        self.storage.update_all(LIFECYCLE, &changed)?;

        match prior {
            Some(p) => info!("Promoted {} (superseding {})", version_id, p.version_id),
            None => info!("Promoted {}", version_id),
        }

        self.get_version(version_id)
    }

    /// Current Active version
    pub fn get_active(&self, tool: &str) -> Result<Version> {
        self.get_tool(tool)?;
        let pointer = self
            .storage
            .get::<ActivePointer>(ACTIVE, tool)?
            .ok_or_else(|| AnvilError::NoActiveVersion(tool.to_string()))?;
        self.get_version(&pointer.version_id)
    }

    /// Active version sequence, if any
    pub fn active_sequence(&self, tool: &str) -> Result<Option<u64>> {
        Ok(self.storage.get::<ActivePointer>(ACTIVE, tool)?.map(|p| p.sequence))
    }

    pub fn get_version(&self, version_id: &str) -> Result<Version> {
        Ok(assemble(self.version_record(version_id)?, self.lifecycle(version_id)?))
    }

    /// Version of a tool by sequence number
    pub fn get_version_by_sequence(&self, tool: &str, sequence: u64) -> Result<Version> {
        self.get_version(&version_id(tool, sequence))
    }

    /// All versions of a tool, oldest first
    pub fn history(&self, tool: &str) -> Result<Vec<Version>> {
        self.get_tool(tool)?;
        let lifecycles: HashMap<String, Lifecycle> = self
            .storage
            .query::<Lifecycle>(LIFECYCLE, &[Filter::eq("tool", tool)])?
            .into_iter()
            .map(|lc| (lc.id.clone(), lc))
            .collect();

        let mut records = self.version_records(tool)?;
        records.sort_by_key(|r| r.sequence);
        records
            .into_iter()
            .map(|r| {
                let lc = lifecycles
                    .get(&r.id)
                    .cloned()
                    .ok_or_else(|| AnvilError::Corruption(format!("{} has no lifecycle", r.id)))?;
                Ok(assemble(r, lc))
            })
            .collect()
    }

    fn version_records(&self, tool: &str) -> Result<Vec<VersionRecord>> {
        self.storage.query(VERSIONS, &[Filter::eq("tool", tool)])
    }

    fn version_record(&self, version_id: &str) -> Result<VersionRecord> {
        self.storage
            .get(VERSIONS, version_id)?
            .ok_or_else(|| AnvilError::VersionNotFound(version_id.to_string()))
    }

    fn lifecycle(&self, version_id: &str) -> Result<Lifecycle> {
        self.storage
            .get(LIFECYCLE, version_id)?
            .ok_or_else(|| AnvilError::VersionNotFound(version_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Load-time validation
    // ------------------------------------------------------------------

    /// Check persisted state against the store invariants
    ///
    /// A version whose lifecycle was never written (crash between the two
    /// appends) is recorded as Rejected. A promotion interrupted after its
    /// pointer write is completed: the pointed-to version becomes Active and
    /// any other Active version of the tool Superseded. Everything else that
    /// disagrees is `Corruption`.
    fn validate(&self) -> Result<()> {
        let tools: HashSet<String> = self
            .storage
            .list::<Tool>(TOOLS)?
            .into_iter()
            .map(|t| t.name)
            .collect();
        let records: Vec<VersionRecord> = self.storage.list(VERSIONS)?;
        let lifecycles: HashMap<String, Lifecycle> = self
            .storage
            .list::<Lifecycle>(LIFECYCLE)?
            .into_iter()
            .map(|lc| (lc.id.clone(), lc))
            .collect();
        let pointers: Vec<ActivePointer> = self.storage.list(ACTIVE)?;

        let mut sequences: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
        let mut active: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for record in &records {
            if !tools.contains(&record.tool) {
                return Err(AnvilError::Corruption(format!(
                    "{} belongs to unregistered tool {}",
                    record.id, record.tool
                )));
            }
            if record.id != version_id(&record.tool, record.sequence) {
                return Err(AnvilError::Corruption(format!(
                    "{} does not match its tool and sequence",
                    record.id
                )));
            }
            if source_digest(&record.source) != record.digest {
                return Err(AnvilError::Corruption(format!("{} digest mismatch", record.id)));
            }
            sequences.entry(&record.tool).or_default().push(record.sequence);

            match lifecycles.get(&record.id) {
                Some(lc) if lc.state == VersionState::Active => {
                    active.entry(&record.tool).or_default().push(&record.id);
                }
                Some(_) => {}
                None => {
                    warn!("{} has no lifecycle; recording it as rejected", record.id);
                    self.storage.create(
                        LIFECYCLE,
                        &Lifecycle {
                            id: record.id.clone(),
                            tool: record.tool.clone(),
                            state: VersionState::Rejected,
                            verification: None,
                            audit: None,
                            updated_at: now_ms(),
                        },
                    )?;
                }
            }
        }

        let known: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        if let Some(orphan) = lifecycles.keys().find(|id| !known.contains(id.as_str())) {
            return Err(AnvilError::Corruption(format!("lifecycle {} has no version", orphan)));
        }

        for (tool, mut seqs) in sequences {
            seqs.sort_unstable();
            let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
            if seqs != expected {
                return Err(AnvilError::Corruption(format!(
                    "{} sequence numbers are not 1..{}: {:?}",
                    tool,
                    seqs.len(),
                    seqs
                )));
            }
        }

        let mut repaired: Vec<Lifecycle> = Vec::new();
        for pointer in &pointers {
            if pointer.version_id != version_id(&pointer.id, pointer.sequence) {
                return Err(AnvilError::Corruption(format!(
                    "active pointer for {} names {} with sequence {}",
                    pointer.id, pointer.version_id, pointer.sequence
                )));
            }
            let named = match lifecycles.get(&pointer.version_id) {
                Some(lc) if lc.tool == pointer.id => lc,
                _ => {
                    return Err(AnvilError::Corruption(format!(
                        "active pointer for {} names unknown version {}",
                        pointer.id, pointer.version_id
                    )));
                }
            };
            if !matches!(
                named.state,
                VersionState::Active | VersionState::Audited | VersionState::Superseded
            ) {
                return Err(AnvilError::Corruption(format!(
                    "active pointer for {} names {} which is {}",
                    pointer.id, pointer.version_id, named.state
                )));
            }

            let stale: Vec<&str> = active
                .get(pointer.id.as_str())
                .map(|ids| ids.iter().copied().filter(|id| *id != pointer.version_id).collect())
                .unwrap_or_default();
            if named.state == VersionState::Active && stale.is_empty() {
                continue;
            }

            warn!(
                "Completing interrupted promotion of {} (superseding {:?})",
                pointer.version_id, stale
            );
            let now = now_ms();
            for id in stale {
                if let Some(lc) = lifecycles.get(id) {
                    let mut lc = lc.clone();
                    lc.state = VersionState::Superseded;
                    lc.updated_at = now;
                    repaired.push(lc);
                }
            }
            if named.state != VersionState::Active {
                let mut lc = named.clone();
                lc.state = VersionState::Active;
                lc.updated_at = now;
                repaired.push(lc);
            }
            active.insert(pointer.id.as_str(), vec![pointer.version_id.as_str()]);
        }
        if !repaired.is_empty() {
            self.storage.update_all(LIFECYCLE, &repaired)?;
        }

        // Without a pointer there is nothing to decide between Active versions
        for (tool, ids) in &active {
            if ids.len() > 1 {
                return Err(AnvilError::Corruption(format!(
                    "{} has {} active versions: {}",
                    tool,
                    ids.len(),
                    ids.join(", ")
                )));
            }
            if !pointers.iter().any(|p| p.id == *tool) {
                return Err(AnvilError::Corruption(format!(
                    "{} is active but {} has no active pointer",
                    ids.join(", "),
                    tool
                )));
            }
        }

        debug!(
            "Validated store: {} tools, {} versions, {} active",
            tools.len(),
            records.len(),
            pointers.len()
        );
        Ok(())
    }
}
