//! In-memory fakes for cloud traits (testing only)

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CloudError;
use crate::iam::{Organization, Policy, PolicyStore};
use crate::storage::{ObjectRef, ObjectStore};
use crate::Result;

/// In-memory object store backed by a `HashMap<ObjectRef, bytes>`.
///
/// Records every `put` so tests can assert on upload counts and order.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<ObjectRef, Vec<u8>>>,
    puts: Mutex<Vec<ObjectRef>>,
    fail_puts: Mutex<bool>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording it as an upload.
    pub fn insert(&self, object: ObjectRef, data: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(object, data.into());
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.objects.lock().unwrap().contains_key(object)
    }

    pub fn read(&self, object: &ObjectRef) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(object).cloned()
    }

    /// Objects written through `put`, in order.
    pub fn puts(&self) -> Vec<ObjectRef> {
        self.puts.lock().unwrap().clone()
    }

    /// Make every subsequent `put` fail with a 403.
    pub fn fail_puts(&self) {
        *self.fail_puts.lock().unwrap() = true;
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, object: &ObjectRef) -> Result<Vec<u8>> {
        self.read(object).ok_or_else(|| CloudError::NotFound {
            bucket: object.bucket.clone(),
            object: object.object.clone(),
        })
    }

    async fn put(&self, object: &ObjectRef, data: Vec<u8>, _content_type: &str) -> Result<()> {
        if *self.fail_puts.lock().unwrap() {
            return Err(CloudError::Http {
                status: 403,
                body: "PERMISSION_DENIED".to_string(),
            });
        }
        self.puts.lock().unwrap().push(object.clone());
        self.objects.lock().unwrap().insert(object.clone(), data);
        Ok(())
    }
}

/// In-memory IAM policy holder with etag checking.
///
/// Each successful write bumps the etag. `interleave_writes(n)` makes the
/// next `n` writes lose a race against another writer.
#[derive(Debug)]
pub struct MemoryPolicyStore {
    policy: Mutex<Policy>,
    generation: Mutex<u64>,
    pending_conflicts: Mutex<usize>,
    fail_reads: Mutex<bool>,
    reads: Mutex<usize>,
    writes: Mutex<Vec<Policy>>,
}

impl MemoryPolicyStore {
    pub fn new(policy: Policy) -> Self {
        let store = Self {
            policy: Mutex::new(policy),
            generation: Mutex::new(0),
            pending_conflicts: Mutex::new(0),
            fail_reads: Mutex::new(false),
            reads: Mutex::new(0),
            writes: Mutex::new(Vec::new()),
        };
        store.bump_etag();
        store
    }

    fn bump_etag(&self) {
        let mut generation = self.generation.lock().unwrap();
        *generation += 1;
        self.policy.lock().unwrap().etag = Some(format!("etag-{}", *generation));
    }

    /// Let another writer get in before each of the next `n` writes.
    pub fn interleave_writes(&self, n: usize) {
        *self.pending_conflicts.lock().unwrap() = n;
    }

    /// Make every subsequent read fail with a 403.
    pub fn fail_reads(&self) {
        *self.fail_reads.lock().unwrap() = true;
    }

    pub fn policy(&self) -> Policy {
        self.policy.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap()
    }

    /// Policies accepted or rejected by `set_policy`, in order.
    pub fn writes(&self) -> Vec<Policy> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get_policy(&self, _org: &Organization) -> Result<Policy> {
        *self.reads.lock().unwrap() += 1;
        if *self.fail_reads.lock().unwrap() {
            return Err(CloudError::Http {
                status: 403,
                body: "PERMISSION_DENIED".to_string(),
            });
        }
        Ok(self.policy())
    }

    async fn set_policy(&self, _org: &Organization, policy: &Policy) -> Result<()> {
        self.writes.lock().unwrap().push(policy.clone());

        let raced = {
            let mut pending = self.pending_conflicts.lock().unwrap();
            let raced = *pending > 0;
            if raced {
                *pending -= 1;
            }
            raced
        };
        if raced {
            self.bump_etag();
        }

        if policy.etag != self.policy.lock().unwrap().etag {
            return Err(CloudError::Http {
                status: 409,
                body: "{\"error\":{\"status\":\"ABORTED\"}}".to_string(),
            });
        }

        *self.policy.lock().unwrap() = policy.clone();
        self.bump_etag();
        Ok(())
    }
}
