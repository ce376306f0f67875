//! Order-maintenance primitives over a report's sections.
//!
//! Every function here leaves `order` values dense (`0..n`) when given dense
//! input. Callers run them against a private copy of the report and commit the
//! copy as a whole, so no intermediate state is observable.

use super::model::{Direction, Section};

/// Checks that the orders form exactly `{0, 1, ..., n-1}`.
pub fn check_dense(sections: &[Section]) -> Result<(), String> {
    let mut orders: Vec<u32> = sections.iter().map(|s| s.order).collect();
    orders.sort_unstable();
    for (expected, actual) in orders.iter().enumerate() {
        if *actual != expected as u32 {
            return Err(format!(
                "expected order {} but found {} (orders: {:?})",
                expected, actual, orders
            ));
        }
    }
    Ok(())
}

/// Inserts `section` at `explicit_order` when it falls inside the current
/// range, shifting later sections up by one; otherwise appends. Returns the
/// final order.
pub fn insert_at(sections: &mut Vec<Section>, mut section: Section, explicit_order: Option<u32>) -> u32 {
    let count = sections.len() as u32;
    let order = match explicit_order {
        Some(order) if order < count => {
            for existing in sections.iter_mut().filter(|s| s.order >= order) {
                existing.order += 1;
            }
            order
        }
        _ => count,
    };

    section.order = order;
    sections.push(section);
    sections.sort_by_key(|s| s.order);
    order
}

/// Swaps `section_id` with its neighbour in `direction`.
///
/// Returns `Some((from, to))` when a swap happened, `None` at a boundary, and
/// `Err` when the section is missing.
pub fn swap_adjacent(
    sections: &mut [Section],
    section_id: &str,
    direction: Direction,
) -> Result<Option<(u32, u32)>, String> {
    let from = sections
        .iter()
        .find(|s| s.id == section_id)
        .map(|s| s.order)
        .ok_or_else(|| format!("section {} not in report", section_id))?;

    let to = match direction {
        Direction::Up => match from.checked_sub(1) {
            Some(to) => to,
            None => return Ok(None),
        },
        Direction::Down => from + 1,
    };

    let Some(neighbour) = sections.iter().position(|s| s.order == to) else {
        return Ok(None);
    };
    let Some(current) = sections.iter().position(|s| s.id == section_id) else {
        return Ok(None);
    };

    sections[neighbour].order = from;
    sections[current].order = to;
    sections.sort_by_key(|s| s.order);
    Ok(Some((from, to)))
}

/// Removes `section_id` and closes the gap it leaves.
pub fn remove_and_compact(sections: &mut Vec<Section>, section_id: &str) -> Option<Section> {
    let index = sections.iter().position(|s| s.id == section_id)?;
    let removed = sections.remove(index);
    for later in sections.iter_mut().filter(|s| s.order > removed.order) {
        later.order -= 1;
    }
    Some(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::model::{SectionMetadata, SectionType};

    fn section(title: &str, order: u32) -> Section {
        Section::new(
            "r1",
            SectionType::Text,
            title,
            &format!("<p>{}</p>", title),
            order,
            SectionMetadata::default(),
        )
    }

    fn titles(sections: &[Section]) -> Vec<String> {
        let mut sorted: Vec<&Section> = sections.iter().collect();
        sorted.sort_by_key(|s| s.order);
        sorted.iter().map(|s| s.title.clone()).collect()
    }

    #[test]
    fn test_check_dense() {
        assert!(check_dense(&[]).is_ok());
        assert!(check_dense(&[section("A", 1), section("B", 0)]).is_ok());
        assert!(check_dense(&[section("A", 0), section("B", 2)]).is_err());
        assert!(check_dense(&[section("A", 0), section("B", 0)]).is_err());
    }

    #[test]
    fn test_insert_appends_without_order() {
        let mut sections = vec![section("A", 0), section("B", 1)];
        let order = insert_at(&mut sections, section("C", 99), None);
        assert_eq!(order, 2);
        assert_eq!(titles(&sections), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_insert_explicit_shifts_later() {
        let mut sections = vec![section("A", 0), section("B", 1), section("C", 2)];
        let order = insert_at(&mut sections, section("X", 0), Some(1));
        assert_eq!(order, 1);
        assert_eq!(titles(&sections), vec!["A", "X", "B", "C"]);
        assert!(check_dense(&sections).is_ok());
    }

    #[test]
    fn test_insert_explicit_out_of_range_appends() {
        let mut sections = vec![section("A", 0)];
        let order = insert_at(&mut sections, section("X", 0), Some(7));
        assert_eq!(order, 1);
        assert!(check_dense(&sections).is_ok());
    }

    #[test]
    fn test_swap_up_and_boundary() {
        let mut sections = vec![section("A", 0), section("B", 1), section("C", 2)];
        let b = sections[1].id.clone();

        assert_eq!(swap_adjacent(&mut sections, &b, Direction::Up).unwrap(), Some((1, 0)));
        assert_eq!(titles(&sections), vec!["B", "A", "C"]);

        assert_eq!(swap_adjacent(&mut sections, &b, Direction::Up).unwrap(), None);
        assert_eq!(titles(&sections), vec!["B", "A", "C"]);
    }

    #[test]
    fn test_swap_down_at_end_is_noop() {
        let mut sections = vec![section("A", 0), section("B", 1)];
        let b = sections[1].id.clone();
        assert_eq!(swap_adjacent(&mut sections, &b, Direction::Down).unwrap(), None);
    }

    #[test]
    fn test_swap_missing_section() {
        let mut sections = vec![section("A", 0)];
        assert!(swap_adjacent(&mut sections, "nope", Direction::Up).is_err());
    }

    #[test]
    fn test_remove_and_compact() {
        let mut sections = vec![
            section("A", 0),
            section("B", 1),
            section("C", 2),
            section("D", 3),
        ];
        let b = sections[1].id.clone();
        let removed = remove_and_compact(&mut sections, &b).unwrap();
        assert_eq!(removed.title, "B");
        assert_eq!(titles(&sections), vec!["A", "C", "D"]);
        let orders: Vec<u32> = sections.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }
}
