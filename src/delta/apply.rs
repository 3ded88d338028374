//! Reconstruction of a new file from a stored version and a delta plan

use super::{DeltaPlan, Instruction};
use crate::error::{Error, Result};

/// Replay `plan` against the stored version's blocks.
///
/// Instructions are applied in ascending `dest_index` order regardless of
/// the order they are listed in; every destination block must be produced
/// exactly once.
pub fn apply_delta<B: AsRef<[u8]>>(plan: &DeltaPlan, remote_blocks: &[B]) -> Result<Vec<u8>> {
    let mut ordered: Vec<&Instruction> = plan.instructions.iter().collect();
    ordered.sort_by_key(|i| i.dest_index());

    let mut output = Vec::with_capacity(plan.target_size() as usize);

    for (position, instruction) in ordered.into_iter().enumerate() {
        if instruction.dest_index() != position {
            return Err(Error::delta(format!(
                "expected destination block {} but found {}",
                position,
                instruction.dest_index()
            )));
        }

        let data: &[u8] = match *instruction {
            Instruction::Copy { source_index, .. } => remote_blocks
                .get(source_index)
                .map(AsRef::as_ref)
                .ok_or_else(|| Error::delta(format!("stored block {} does not exist", source_index)))?,
            Instruction::Insert { block_index, .. } => plan
                .novel_blocks
                .get(block_index)
                .map(|b| b.data.as_ref())
                .ok_or_else(|| Error::delta(format!("novel block {} was not supplied", block_index)))?,
        };

        if data.len() != instruction.length() {
            return Err(Error::delta(format!(
                "block for destination {} is {} bytes, instruction says {}",
                position,
                data.len(),
                instruction.length()
            )));
        }

        output.extend_from_slice(data);
    }

    Ok(output)
}
