//! Funder (§4.4): UTXO selection and change-amount distribution. Wraps
//! the storage layer's atomic `reserve_utxos`/`commit_reservation` pair
//! and adds the change-distribution algorithm from §4.2 step 8, which is
//! pure arithmetic and so lives outside the storage boundary.

use std::collections::BTreeSet;

use rand::Rng;

use crate::error::AppError;
use crate::storage::repo::{self, ReservationResult};
use crate::storage::Store;
use crate::types::{OutputBasket, OutputId, Satoshis, UserId};

pub struct FundingPlan {
    pub reservation: ReservationResult,
    pub change_amounts: Vec<Satoshis>,
}

/// Selects and atomically reserves UTXOs covering `target_sat` plus fee,
/// then splits the resulting change into `change_outputs_count` amounts
/// via the distribution algorithm. `initial_tx_size` is the caller's
/// size estimate for everything already fixed (outputs, caller-supplied
/// inputs) before any funder-selected input or change output is added.
#[allow(clippy::too_many_arguments)]
pub fn fund(
    store: &Store,
    user_id: UserId,
    target_sat: Satoshis,
    basket: &OutputBasket,
    already_reserved: &BTreeSet<OutputId>,
    priority_outpoints: &[OutputId],
    include_sending: bool,
    sat_per_kb: u64,
    initial_tx_size: u32,
) -> Result<FundingPlan, AppError> {
    let reservation = repo::reserve_utxos(
        store,
        user_id,
        target_sat,
        basket,
        already_reserved,
        priority_outpoints,
        include_sending,
        sat_per_kb,
        initial_tx_size,
    )?;

    let change_amounts = if reservation.change_outputs_count == 0 {
        Vec::new()
    } else {
        distribute_change(
            reservation.change_amount,
            reservation.change_outputs_count,
            basket.minimum_desired_utxo_value.max(1),
        )?
    };

    // Selection is a snapshot read; the caller commits the reservation
    // against the owning transaction's id once it has allocated one
    // (`repo::commit_reservation`), which is where a concurrent funding
    // race is actually caught and rejected.
    Ok(FundingPlan {
        reservation,
        change_amounts,
    })
}

/// §4.2 step 8's change-distribution algorithm: splits `amount` into
/// `count` buckets each at least `m`, reshuffling surplus so no single
/// change output stands out as exactly "amount minus round numbers".
///
/// - `amount == count * m` → every bucket gets exactly `m`.
/// - `amount > count * m` → start from `[base+rem, base, .., base]`
///   (`base = amount/count`, `rem = amount%count`), then for each index
///   draw noise `n[i] in [0, current[i]-m]` and set
///   `out[i] = current[i] - n[i] + n[count-1-i]`. This preserves the sum
///   (each unit of noise removed at `i` is added back at its mirror
///   index) and keeps every bucket at or above `m`.
/// - `(count-1)*m < amount < count*m` → `[amount-(count-1)*m, m, .., m]`.
/// - otherwise → rejected: not enough to meet the minimum per bucket.
pub fn distribute_change(amount: Satoshis, count: u32, m: Satoshis) -> Result<Vec<Satoshis>, AppError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let count_i = count as Satoshis;
    if amount == count_i * m {
        return Ok(vec![m; count as usize]);
    }
    if amount > count_i * m {
        let base = amount / count_i;
        let rem = amount % count_i;
        let mut current: Vec<Satoshis> = vec![base; count as usize];
        current[0] += rem;

        let mut rng = rand::thread_rng();
        let noise: Vec<Satoshis> = current
            .iter()
            .map(|&c| {
                let max_n = c - m;
                if max_n <= 0 {
                    0
                } else {
                    rng.gen_range(0..=max_n)
                }
            })
            .collect();

        let n = count as usize;
        let out: Vec<Satoshis> = (0..n).map(|i| current[i] - noise[i] + noise[n - 1 - i]).collect();
        debug_assert_eq!(out.iter().sum::<Satoshis>(), amount);
        return Ok(out);
    }
    if amount > (count_i - 1) * m {
        let mut out = vec![m; count as usize];
        out[0] = amount - (count_i - 1) * m;
        return Ok(out);
    }
    Err(AppError::Reservation(format!(
        "change amount {amount} cannot fill {count} buckets at minimum {m} each"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_distributes_evenly() {
        let out = distribute_change(500, 5, 100).unwrap();
        assert_eq!(out, vec![100; 5]);
    }

    #[test]
    fn surplus_distribution_preserves_sum_and_minimum() {
        let out = distribute_change(10_000, 4, 500).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out.iter().sum::<Satoshis>(), 10_000);
        assert!(out.iter().all(|&v| v >= 500));
    }

    #[test]
    fn shortfall_below_full_minimum_yields_single_small_bucket() {
        let out = distribute_change(1_300, 3, 500).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.iter().sum::<Satoshis>(), 1_300);
        assert_eq!(out.iter().filter(|&&v| v < 500).count(), 1);
    }

    #[test]
    fn insufficient_amount_is_rejected() {
        assert!(distribute_change(100, 3, 500).is_err());
    }

    #[test]
    fn property_sum_and_minimum_hold_across_many_amounts() {
        for count in 1..6u32 {
            for amount in [count as Satoshis * 500, count as Satoshis * 500 + 3750, 5000] {
                if amount < (count as Satoshis - 1) * 500 + 1 {
                    continue;
                }
                let out = distribute_change(amount, count, 500).unwrap();
                assert_eq!(out.iter().sum::<Satoshis>(), amount);
                let below_min = out.iter().filter(|&&v| v < 500).count();
                assert!(below_min <= 1);
            }
        }
    }
}
