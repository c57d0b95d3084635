//! State and traversal planning shared by the navigator variants.

use tapevault_tape::{TapeDrive, TapeError};

use super::SetCursor;

pub(super) struct NavState {
    pub cursor: SetCursor,
    pub toc_invalidated: bool,
}

impl NavState {
    pub fn new() -> Self {
        Self {
            cursor: SetCursor::Unknown,
            toc_invalidated: false,
        }
    }

    /// Positioning failed, the head is wherever the drive stopped.
    pub fn fail<T>(&mut self, err: TapeError) -> Result<T, TapeError> {
        self.cursor = SetCursor::Unknown;
        Err(err)
    }

    pub fn arrive(&mut self, cursor: SetCursor) {
        self.cursor = cursor;
    }

    /// Advance the cursor by one set, keeping its counting direction.
    pub fn advance(&mut self) {
        if let SetCursor::At(index) = self.cursor {
            self.cursor = SetCursor::At(index + 1);
        }
    }
}

type Reposition<'a> = &'a mut dyn FnMut(&mut TapeDrive) -> Result<(), TapeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Current(i32),
    Begin,
    End,
}

/// Cheapest route to `target`, in units of separators crossed. The
/// relative route is only available while current and target count
/// from the same side; mixing the forms would need the total set
/// count, which the cursor model avoids.
fn plan_route(cursor: SetCursor, target: i32) -> Route {
    let (absolute, absolute_cost) = if target >= 0 {
        (Route::Begin, target)
    } else {
        (Route::End, -1 - target)
    };
    if let SetCursor::At(current) = cursor {
        if (current >= 0) == (target >= 0) {
            let delta = target - current;
            if delta.abs() <= absolute_cost {
                return Route::Current(delta);
            }
        }
    }
    absolute
}

/// Walk to the start of a content set in a setmark-separated layout.
pub(super) fn move_to_set_by_setmarks(
    state: &mut NavState,
    drive: &mut TapeDrive,
    target: i32,
    to_begin: Reposition,
    to_end: Reposition,
) -> Result<(), TapeError> {
    let mut walk = |drive: &mut TapeDrive| -> Result<(), TapeError> {
        match plan_route(state.cursor, target) {
            Route::Begin => {
                to_begin(drive)?;
                if target > 0 {
                    drive.move_next_setmark(target)?;
                }
                Ok(())
            }
            Route::End => {
                to_end(drive)?;
                if target <= -2 {
                    drive.move_next_setmark(target)?;
                    drive.move_next_setmark(1)?;
                }
                Ok(())
            }
            Route::Current(0) => Ok(()),
            Route::Current(delta) if delta > 0 => drive.move_next_setmark(delta),
            Route::Current(delta) => {
                match drive.move_next_setmark(delta - 1) {
                    Ok(()) => drive.move_next_setmark(1),
                    // running into the load point while aiming at the
                    // first set is fine, that is where it starts
                    Err(TapeError::BeginningOfMedia) if target == 0 => {
                        drive.reset_error();
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        }
    };
    match walk(drive) {
        Ok(()) => {
            state.arrive(SetCursor::At(target));
            Ok(())
        }
        Err(err) => state.fail(err),
    }
}

/// Walk to the start of a content set in a filemark-separated layout.
/// Needs the per-set filemark counts to translate set distances into
/// mark counts.
pub(super) fn move_to_set_by_filemarks(
    state: &mut NavState,
    drive: &mut TapeDrive,
    target: i32,
    layout: Option<&[u32]>,
    to_begin: Reposition,
    to_end: Reposition,
) -> Result<(), TapeError> {
    // trivial targets work without a layout
    if target == 0 || target == -1 {
        let moved = if target == 0 {
            to_begin(drive)
        } else {
            to_end(drive)
        };
        return match moved {
            Ok(()) => {
                state.arrive(SetCursor::At(target));
                Ok(())
            }
            Err(err) => state.fail(err),
        };
    }

    let layout = match layout {
        Some(layout) => layout,
        None => {
            return state.fail(TapeError::invalid_data(
                "set layout unknown, cannot address sets by filemarks",
            ))
        }
    };
    let count = layout.len() as i32;
    let normalize = |index: i32| -> Option<i32> {
        let absolute = if index >= 0 { index } else { count + 1 + index };
        (0..=count).contains(&absolute).then_some(absolute)
    };
    // marks between content begin and the start of each set
    let mut cumulative = Vec::with_capacity(layout.len() + 1);
    let mut sum = 0u32;
    cumulative.push(0u32);
    for marks in layout {
        sum += marks;
        cumulative.push(sum);
    }

    let Some(absolute) = normalize(target) else {
        return state.fail(TapeError::invalid_data(format!(
            "set index {target} outside the recorded layout"
        )));
    };
    let target_marks = cumulative[absolute as usize] as i32;
    let total_marks = *cumulative.last().unwrap() as i32;

    let current_marks = match state.cursor {
        SetCursor::At(current) => {
            normalize(current).map(|index| cumulative[index as usize] as i32)
        }
        _ => None,
    };

    let mut walk = |drive: &mut TapeDrive| -> Result<(), TapeError> {
        // pick the route with the fewest marks to cross
        let from_begin = target_marks;
        let from_end = total_marks - target_marks;
        let from_current = current_marks.map(|marks| (target_marks - marks).abs());

        let mut stay = |_: &mut TapeDrive| Ok(());
        let (delta, position): (i32, Reposition) = match from_current {
            Some(cost) if cost <= from_begin && cost <= from_end => {
                (target_marks - current_marks.unwrap(), &mut stay)
            }
            _ if from_begin <= from_end => (target_marks, to_begin),
            _ => (target_marks - total_marks, to_end),
        };
        position(drive)?;
        if delta > 0 {
            drive.move_next_filemark(delta)?;
        } else if delta < 0 {
            match drive.move_next_filemark(delta - 1) {
                Ok(()) => drive.move_next_filemark(1)?,
                Err(TapeError::BeginningOfMedia) if target_marks == 0 => {
                    drive.reset_error();
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    };
    match walk(drive) {
        Ok(()) => {
            state.arrive(SetCursor::At(target));
            Ok(())
        }
        Err(err) => state.fail(err),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn route_planning() {
        // no usable current position: absolute routes
        assert_eq!(plan_route(SetCursor::Unknown, 3), Route::Begin);
        assert_eq!(plan_route(SetCursor::Unknown, -3), Route::End);
        assert_eq!(plan_route(SetCursor::InToc, 0), Route::Begin);

        // relative wins when it is at least as cheap
        assert_eq!(plan_route(SetCursor::At(2), 3), Route::Current(1));
        assert_eq!(plan_route(SetCursor::At(-1), -2), Route::Current(-1));

        // mixing counting directions falls back to absolute routes
        assert_eq!(plan_route(SetCursor::At(-2), 1), Route::Begin);
        assert_eq!(plan_route(SetCursor::At(2), -2), Route::End);

        // a distant current position loses against the closer end
        assert_eq!(plan_route(SetCursor::At(9), 1), Route::Begin);
    }
}
