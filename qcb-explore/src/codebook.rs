//! Codebook: the mutable code store and its only apply layer
//!
//! All mutation goes through [`Codebook::apply`] (plus the administrative
//! [`Codebook::absorb`] and [`Codebook::retire`]). Every operation validates
//! completely before the first write, so a failed call leaves the codebook
//! untouched.
//!
//! Invariants:
//! - ids come from a monotonic counter starting at 1 and are never reused
//! - a retired id is never live again
//! - evidence on a code never contains duplicates
//! - the embedding store holds exactly the live codes that have embeddings

use crate::embedding_store::EmbeddingStore;
use crate::error::{CodebookError, CodebookResult};
use crate::framework::FunctionSet;
use crate::types::{
    AppliedResult, ArticleId, Candidate, Code, CodeId, Evidence, FieldChanges, Function, Operation,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

/// Why a code id was retired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetireReason {
    /// Absorbed into another live code
    Merged { into: CodeId },
    /// Removed by an administrator
    Deleted,
}

/// Tombstone for a retired code id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetiredCode {
    pub id: CodeId,
    pub name: String,
    pub function: Function,
    pub reason: RetireReason,
    pub retired_at: DateTime<Utc>,
}

/// Aggregate figures over the live codebook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebookStatistics {
    pub total_codes: usize,
    pub retired_codes: usize,
    /// Live codes per function label (every configured label present)
    pub function_distribution: BTreeMap<String, usize>,
    pub total_evidence: usize,
    pub distinct_articles: usize,
    pub codes_with_embeddings: usize,
}

/// Human-readable code view (no vectors)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedCode {
    pub id: CodeId,
    pub name: String,
    pub function: Function,
    pub version: u32,
    /// Quotes grouped by article
    pub evidence: BTreeMap<ArticleId, Vec<String>>,
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Human-readable codebook export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebookExport {
    pub exported_at: DateTime<Utc>,
    pub statistics: CodebookStatistics,
    pub codes: Vec<ExportedCode>,
    pub retired: Vec<RetiredCode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Codebook {
    next_id: u64,
    codes: BTreeMap<CodeId, Code>,
    retired: BTreeMap<CodeId, RetiredCode>,
    store: EmbeddingStore,
    functions: FunctionSet,
}

impl Codebook {
    /// Empty codebook; the first created code gets id 1
    pub fn new(dimension: usize, functions: FunctionSet) -> Self {
        Self {
            next_id: 1,
            codes: BTreeMap::new(),
            retired: BTreeMap::new(),
            store: EmbeddingStore::new(dimension),
            functions,
        }
    }

    /// Rebuild a codebook from persisted parts, checking every invariant
    pub(crate) fn from_parts(
        next_id: u64,
        codes: Vec<Code>,
        retired: Vec<RetiredCode>,
        dimension: usize,
        functions: FunctionSet,
    ) -> CodebookResult<Self> {
        if next_id == 0 {
            return Err(CodebookError::Snapshot("next_id must be at least 1".to_string()));
        }

        let mut codebook = Self::new(dimension, functions);
        codebook.next_id = next_id;

        for code in codes {
            if code.id.0 == 0 || code.id.0 >= next_id {
                return Err(CodebookError::Snapshot(format!(
                    "Code id {} outside issued range [1, {})",
                    code.id, next_id
                )));
            }
            if !codebook.functions.contains(&code.function) {
                return Err(CodebookError::Snapshot(format!(
                    "Code {} has unknown function '{}'",
                    code.id, code.function
                )));
            }
            if code.name.trim().is_empty() {
                return Err(CodebookError::Snapshot(format!("Code {} has an empty name", code.id)));
            }
            if code.evidence.is_empty() {
                return Err(CodebookError::Snapshot(format!("Code {} has no evidence", code.id)));
            }
            let distinct: HashSet<&Evidence> = code.evidence.iter().collect();
            if distinct.len() != code.evidence.len() {
                return Err(CodebookError::Snapshot(format!(
                    "Code {} has duplicate evidence",
                    code.id
                )));
            }
            if let Some(vector) = &code.embedding {
                codebook.store.upsert(code.id, vector.clone()).map_err(|e| {
                    CodebookError::Snapshot(format!("Code {}: {}", code.id, e))
                })?;
            }
            if codebook.codes.insert(code.id, code).is_some() {
                return Err(CodebookError::Snapshot("Duplicate live code id".to_string()));
            }
        }

        for tombstone in retired {
            if tombstone.id.0 == 0 || tombstone.id.0 >= next_id {
                return Err(CodebookError::Snapshot(format!(
                    "Retired id {} outside issued range [1, {})",
                    tombstone.id, next_id
                )));
            }
            if codebook.codes.contains_key(&tombstone.id) {
                return Err(CodebookError::Snapshot(format!(
                    "Id {} is both live and retired",
                    tombstone.id
                )));
            }
            if !codebook.functions.contains(&tombstone.function) {
                return Err(CodebookError::Snapshot(format!(
                    "Retired code {} has unknown function '{}'",
                    tombstone.id, tombstone.function
                )));
            }
            if codebook.retired.insert(tombstone.id, tombstone).is_some() {
                return Err(CodebookError::Snapshot("Duplicate retired code id".to_string()));
            }
        }

        Ok(codebook)
    }

    // ========================================================================
    // Apply layer
    // ========================================================================

    /// Apply one operation
    pub fn apply(&mut self, operation: &Operation) -> CodebookResult<AppliedResult> {
        let result = match operation {
            Operation::CreateCode { candidate } => self.apply_create(candidate),
            Operation::MergeCodes {
                candidate,
                target_id,
            } => self.apply_merge(candidate, *target_id),
            Operation::UpdateCode {
                candidate,
                target_id,
                fields_changed,
            } => self.apply_update(candidate, *target_id, fields_changed),
            Operation::NoAction { reason, .. } => Ok(AppliedResult::NoAction { reason: *reason }),
        }?;

        debug!(
            operation = operation.kind().as_str(),
            code_id = ?result.code_id(),
            version = ?result.version(),
            "Applied codebook operation"
        );
        Ok(result)
    }

    fn apply_create(&mut self, candidate: &Candidate) -> CodebookResult<AppliedResult> {
        let name = validated_name(&candidate.name)?;
        self.check_function(&candidate.function)?;
        if let Some(vector) = &candidate.embedding {
            self.store.check_vector(vector)?;
        }
        let evidence = new_evidence(&[], &candidate.evidence);
        if evidence.is_empty() {
            return Err(CodebookError::InsufficientEvidence(format!(
                "Code '{}' would have no evidence",
                name
            )));
        }

        let id = CodeId(self.next_id);
        let now = Utc::now();
        let code = Code {
            id,
            name,
            function: candidate.function.clone(),
            evidence,
            embedding: candidate.embedding.clone(),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        if let Some(vector) = &code.embedding {
            self.store.upsert(id, vector.clone())?;
        }
        self.codes.insert(id, code);
        self.next_id += 1;

        Ok(AppliedResult::Created { id })
    }

    fn apply_merge(
        &mut self,
        candidate: &Candidate,
        target_id: CodeId,
    ) -> CodebookResult<AppliedResult> {
        self.check_function(&candidate.function)?;
        let target = self
            .codes
            .get_mut(&target_id)
            .ok_or(CodebookError::UnknownCode(target_id))?;

        let additions = new_evidence(&target.evidence, &candidate.evidence);
        // Candidate function wins only with strictly more new evidence than the target holds
        let function_changed =
            candidate.function != target.function && additions.len() > target.evidence.len();

        let evidence_added = additions.len();
        target.evidence.extend(additions);
        if function_changed {
            target.function = candidate.function.clone();
        }
        target.version += 1;
        target.updated_at = Utc::now();

        Ok(AppliedResult::Merged {
            target_id,
            version: target.version,
            evidence_added,
            function_changed,
        })
    }

    fn apply_update(
        &mut self,
        candidate: &Candidate,
        target_id: CodeId,
        fields: &FieldChanges,
    ) -> CodebookResult<AppliedResult> {
        let new_name = fields.name.as_deref().map(validated_name).transpose()?;
        if let Some(function) = &fields.function {
            self.check_function(function)?;
        }
        let target = self
            .codes
            .get_mut(&target_id)
            .ok_or(CodebookError::UnknownCode(target_id))?;

        let additions = new_evidence(&target.evidence, &candidate.evidence);
        let evidence_added = additions.len();
        target.evidence.extend(additions);

        let mut name_changed = false;
        if let Some(name) = new_name {
            name_changed = name != target.name;
            target.name = name;
        }
        let mut function_changed = false;
        if let Some(function) = &fields.function {
            function_changed = *function != target.function;
            target.function = function.clone();
        }
        target.version += 1;
        target.updated_at = Utc::now();

        Ok(AppliedResult::Updated {
            target_id,
            version: target.version,
            evidence_added,
            name_changed,
            function_changed,
        })
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Merge two committed codes; `absorbed` is tombstoned into `survivor`
    pub fn absorb(&mut self, survivor: CodeId, absorbed: CodeId) -> CodebookResult<AppliedResult> {
        if survivor == absorbed {
            return Err(CodebookError::Validation(format!(
                "Cannot absorb code {} into itself",
                survivor
            )));
        }
        let target = self
            .codes
            .get(&survivor)
            .ok_or(CodebookError::UnknownCode(survivor))?;
        let source = self
            .codes
            .get(&absorbed)
            .ok_or(CodebookError::UnknownCode(absorbed))?;
        let additions = new_evidence(&target.evidence, &source.evidence);
        let evidence_added = additions.len();

        let now = Utc::now();
        let Some(absorbed_code) = self.codes.remove(&absorbed) else {
            return Err(CodebookError::UnknownCode(absorbed));
        };
        let mut version = 0;
        if let Some(target) = self.codes.get_mut(&survivor) {
            target.evidence.extend(additions);
            target.version += 1;
            target.updated_at = now;
            version = target.version;
        }

        self.store.remove(absorbed);
        self.retired.insert(
            absorbed,
            RetiredCode {
                id: absorbed,
                name: absorbed_code.name,
                function: absorbed_code.function,
                reason: RetireReason::Merged { into: survivor },
                retired_at: now,
            },
        );

        info!(
            survivor = survivor.0,
            absorbed = absorbed.0,
            version,
            evidence_added,
            "Absorbed code"
        );

        Ok(AppliedResult::Merged {
            target_id: survivor,
            version,
            evidence_added,
            function_changed: false,
        })
    }

    /// Delete a live code, leaving a tombstone
    pub fn retire(&mut self, id: CodeId) -> CodebookResult<RetiredCode> {
        let code = self.codes.remove(&id).ok_or(CodebookError::UnknownCode(id))?;
        self.store.remove(id);

        let tombstone = RetiredCode {
            id,
            name: code.name,
            function: code.function,
            reason: RetireReason::Deleted,
            retired_at: Utc::now(),
        };
        self.retired.insert(id, tombstone.clone());

        info!(code_id = id.0, "Retired code");
        Ok(tombstone)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, id: CodeId) -> Option<&Code> {
        self.codes.get(&id)
    }

    /// Live codes in ascending id order
    pub fn codes(&self) -> impl Iterator<Item = &Code> + '_ {
        self.codes.values()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn is_retired(&self, id: CodeId) -> bool {
        self.retired.contains_key(&id)
    }

    /// Tombstones in ascending id order
    pub fn retired(&self) -> impl Iterator<Item = &RetiredCode> + '_ {
        self.retired.values()
    }

    /// Id the next CREATE will receive
    pub fn next_id(&self) -> CodeId {
        CodeId(self.next_id)
    }

    pub fn embedding_store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn functions(&self) -> &FunctionSet {
        &self.functions
    }

    /// Case-insensitive lookup by name (lowest id wins)
    pub fn find_by_name(&self, name: &str) -> Option<&Code> {
        let wanted = name.trim().to_lowercase();
        self.codes
            .values()
            .find(|code| code.name.to_lowercase() == wanted)
    }

    pub fn codes_with_function(&self, function: &Function) -> Vec<&Code> {
        self.codes
            .values()
            .filter(|code| &code.function == function)
            .collect()
    }

    pub fn statistics(&self) -> CodebookStatistics {
        let mut function_distribution: BTreeMap<String, usize> = self
            .functions
            .labels()
            .iter()
            .map(|label| (label.clone(), 0))
            .collect();
        let mut articles = BTreeSet::new();
        let mut total_evidence = 0;

        for code in self.codes.values() {
            *function_distribution
                .entry(code.function.as_str().to_string())
                .or_insert(0) += 1;
            total_evidence += code.evidence.len();
            articles.extend(code.evidence.iter().map(|e| e.article_id));
        }

        CodebookStatistics {
            total_codes: self.codes.len(),
            retired_codes: self.retired.len(),
            function_distribution,
            total_evidence,
            distinct_articles: articles.len(),
            codes_with_embeddings: self.store.len(),
        }
    }

    pub fn export(&self) -> CodebookExport {
        let codes = self
            .codes
            .values()
            .map(|code| {
                let mut evidence: BTreeMap<ArticleId, Vec<String>> = BTreeMap::new();
                for e in &code.evidence {
                    evidence.entry(e.article_id).or_default().push(e.quote.clone());
                }
                ExportedCode {
                    id: code.id,
                    name: code.name.clone(),
                    function: code.function.clone(),
                    version: code.version,
                    evidence,
                    has_embedding: code.embedding.is_some(),
                    created_at: code.created_at,
                    updated_at: code.updated_at,
                }
            })
            .collect();

        CodebookExport {
            exported_at: Utc::now(),
            statistics: self.statistics(),
            codes,
            retired: self.retired.values().cloned().collect(),
        }
    }

    fn check_function(&self, function: &Function) -> CodebookResult<()> {
        if self.functions.contains(function) {
            Ok(())
        } else {
            Err(CodebookError::Validation(format!(
                "Function '{}' is not in the configured framework",
                function
            )))
        }
    }
}

fn validated_name(name: &str) -> CodebookResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CodebookError::Validation("Code name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Entries of `incoming` not in `existing`, deduplicated, in arrival order
fn new_evidence(existing: &[Evidence], incoming: &[Evidence]) -> Vec<Evidence> {
    let mut seen: HashSet<&Evidence> = existing.iter().collect();
    let mut additions = Vec::new();
    for e in incoming {
        if seen.insert(e) {
            additions.push(e.clone());
        }
    }
    additions
}
