//! Deterministic group-id fingerprints (§6, §9 "Deterministic group-id
//! fingerprint"). These are used only on the create request; the
//! controller's read-back id is always authoritative and these values are
//! never persisted without that read-back.

const JOB_GROUP_RANGE: u32 = 65535 - 16;
const JOB_GROUP_BASE: u32 = 16;

const STORAGE_GROUP_RANGE: u32 = 65535 - 32768;
const STORAGE_GROUP_BASE: u32 = 32768;

fn fingerprint(input: &str, range: u32, base: u32) -> u32 {
    let mut acc: u32 = 0;
    for c in input.chars() {
        acc = acc.wrapping_mul(31).wrapping_add(c as u32);
    }
    acc % range + base
}

/// Job security-group id: `((Σ 31·acc + codepoint) mod 65519) + 16`.
pub fn job_security_group_id(job_id: &str) -> u32 {
    fingerprint(job_id, JOB_GROUP_RANGE, JOB_GROUP_BASE)
}

/// Storage security-group id: `((Σ 31·acc + codepoint) mod 32767) + 32768`.
pub fn storage_security_group_id(node_name: &str) -> u32 {
    fingerprint(node_name, STORAGE_GROUP_RANGE, STORAGE_GROUP_BASE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_group_id_is_in_range() {
        for id in ["42", "a-very-long-job-identifier", "", "😀"] {
            let gid = job_security_group_id(id);
            assert!((16..65535).contains(&gid), "gid {gid} out of range for {id:?}");
        }
    }

    #[test]
    fn job_group_id_is_deterministic() {
        assert_eq!(job_security_group_id("42"), job_security_group_id("42"));
    }

    #[test]
    fn different_job_ids_usually_differ() {
        assert_ne!(job_security_group_id("42"), job_security_group_id("43"));
    }

    #[test]
    fn storage_group_id_is_in_range_and_disjoint_from_job_range() {
        for name in ["node-1", "storage-node-7"] {
            let gid = storage_security_group_id(name);
            assert!((32768..65535).contains(&gid));
        }
    }
}
