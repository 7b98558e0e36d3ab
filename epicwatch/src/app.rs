//! Application state for the dashboard TUI.

use std::collections::BTreeSet;

use crossterm::event::{KeyCode, KeyEvent};
use epicwatch_core::{DashboardView, ExpandTarget, SessionHandle};
use ratatui::widgets::TableState;
use tokio::sync::watch;

/// What a tree row points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Epic { epic: u32 },
    Story { epic: u32, story: u32 },
    Phase { epic: u32, story: u32, index: usize },
}

impl RowKind {
    /// The expansion key this row toggles, if it has children
    fn target(&self) -> Option<ExpandTarget> {
        match *self {
            RowKind::Epic { epic } => Some(ExpandTarget::Epic { epic }),
            RowKind::Story { epic, story } => Some(ExpandTarget::Story { epic, story }),
            RowKind::Phase { .. } => None,
        }
    }
}

/// One visible line of the flattened epic/story/phase tree
#[derive(Debug, Clone)]
pub struct TreeRow {
    pub kind: RowKind,
    pub depth: u16,
    pub label: String,
    pub status: String,
    /// "done/total" for epics, phases completed for stories
    pub progress: Option<String>,
    pub has_children: bool,
    pub expanded: bool,
}

pub struct App {
    /// Latest snapshot from the session
    pub view: DashboardView,
    pub rows: Vec<TreeRow>,
    pub table_state: TableState,
    pub should_quit: bool,
    /// One-line feedback for the last key command
    pub status_message: Option<String>,
    handle: SessionHandle,
    views: watch::Receiver<DashboardView>,
    expanded: BTreeSet<ExpandTarget>,
    /// Highest auto-expand request number already honoured, so user
    /// collapses stick until the node is asked for again
    expand_seen: u64,
}

impl App {
    pub fn new(handle: SessionHandle) -> Self {
        let views = handle.subscribe();
        let mut app = Self {
            view: DashboardView::default(),
            rows: Vec::new(),
            table_state: TableState::default(),
            should_quit: false,
            status_message: None,
            handle,
            views,
            expanded: BTreeSet::new(),
            expand_seen: 0,
        };
        let view = app.views.borrow_and_update().clone();
        app.update_view(view);
        app
    }

    /// Pull a newer view from the session if one was published.
    /// Returns true when the screen needs new data.
    pub fn refresh(&mut self) -> bool {
        match self.views.has_changed() {
            Ok(true) => {
                let view = self.views.borrow_and_update().clone();
                self.update_view(view);
                true
            }
            // Runner gone; keep showing the last view
            Ok(false) | Err(_) => false,
        }
    }

    /// Install a new view, honouring fresh auto-expand requests.
    pub fn update_view(&mut self, view: DashboardView) {
        let mut newest = self.expand_seen;
        for (target, &request) in &view.expand_requests {
            if request > self.expand_seen {
                self.expanded.insert(*target);
                newest = newest.max(request);
            }
        }
        self.expand_seen = newest;
        self.view = view;
        self.rebuild_rows();
    }

    pub fn is_expanded(&self, target: &ExpandTarget) -> bool {
        self.expanded.contains(target)
    }

    /// Handle keyboard input.
    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.select_next();
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.select_previous();
            }
            KeyCode::Home | KeyCode::Char('g') => {
                self.select_first();
            }
            KeyCode::End | KeyCode::Char('G') => {
                self.select_last();
            }
            KeyCode::Enter | KeyCode::Char(' ') => {
                self.toggle_selected();
            }
            KeyCode::Char('r') => {
                self.status_message = Some(if self.handle.connect() {
                    "Reconnecting...".to_string()
                } else {
                    "Session has stopped".to_string()
                });
            }
            KeyCode::Char('s') => {
                self.status_message = Some(if self.handle.resync() {
                    "Resync requested".to_string()
                } else {
                    "Session has stopped".to_string()
                });
            }
            _ => {}
        }
    }

    /// Expand or collapse the selected epic or story.
    fn toggle_selected(&mut self) {
        let Some(target) = self.selected_row().and_then(|row| row.kind.target()) else {
            return;
        };
        if !self.expanded.remove(&target) {
            self.expanded.insert(target);
        }
        self.rebuild_rows();
    }

    pub fn selected_row(&self) -> Option<&TreeRow> {
        self.table_state.selected().and_then(|i| self.rows.get(i))
    }

    /// Flatten the tree into visible rows, keeping the selection on the
    /// same item when it is still visible.
    fn rebuild_rows(&mut self) {
        let selected = self.selected_row().map(|row| row.kind);

        let mut rows = Vec::new();
        for epic in &self.view.tree.epics {
            let epic_key = ExpandTarget::Epic { epic: epic.id };
            let epic_open = self.expanded.contains(&epic_key);
            rows.push(TreeRow {
                kind: RowKind::Epic { epic: epic.id },
                depth: 0,
                label: match &epic.title {
                    Some(title) => format!("Epic {}: {}", epic.id, title),
                    None => format!("Epic {}", epic.id),
                },
                status: String::new(),
                progress: Some(format!("{}/{}", epic.done_count(), epic.stories.len())),
                has_children: !epic.stories.is_empty(),
                expanded: epic_open,
            });
            if !epic_open {
                continue;
            }

            for story in &epic.stories {
                let story_key = ExpandTarget::Story {
                    epic: epic.id,
                    story: story.id,
                };
                let story_open = self.expanded.contains(&story_key);
                let phases_done = story
                    .phases
                    .iter()
                    .filter(|p| p.status == epicwatch_core::PhaseStatus::Completed)
                    .count();
                rows.push(TreeRow {
                    kind: RowKind::Story {
                        epic: epic.id,
                        story: story.id,
                    },
                    depth: 1,
                    label: match &story.title {
                        Some(title) => format!("{}.{} {}", epic.id, story.id, title),
                        None => format!("{}.{}", epic.id, story.id),
                    },
                    status: story.status.to_string(),
                    progress: (!story.phases.is_empty())
                        .then(|| format!("{}/{}", phases_done, story.phases.len())),
                    has_children: !story.phases.is_empty(),
                    expanded: story_open,
                });
                if !story_open {
                    continue;
                }

                for (index, phase) in story.phases.iter().enumerate() {
                    rows.push(TreeRow {
                        kind: RowKind::Phase {
                            epic: epic.id,
                            story: story.id,
                            index,
                        },
                        depth: 2,
                        label: phase.name.clone(),
                        status: phase.status.to_string(),
                        progress: None,
                        has_children: false,
                        expanded: false,
                    });
                }
            }
        }
        self.rows = rows;

        let index = selected
            .and_then(|kind| self.rows.iter().position(|row| row.kind == kind))
            .or_else(|| {
                // Item vanished or nothing selected yet
                let previous = self.table_state.selected().unwrap_or(0);
                (!self.rows.is_empty()).then(|| previous.min(self.rows.len() - 1))
            });
        self.table_state.select(index);
    }

    /// Select the next row in the table.
    fn select_next(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = match self.table_state.selected() {
            Some(i) if i + 1 < self.rows.len() => i + 1,
            Some(_) => 0,
            None => 0,
        };
        self.table_state.select(Some(i));
    }

    /// Select the previous row in the table.
    fn select_previous(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = match self.table_state.selected() {
            Some(0) => self.rows.len() - 1,
            Some(i) => i - 1,
            None => 0,
        };
        self.table_state.select(Some(i));
    }

    fn select_first(&mut self) {
        if !self.rows.is_empty() {
            self.table_state.select(Some(0));
        }
    }

    fn select_last(&mut self) {
        if !self.rows.is_empty() {
            self.table_state.select(Some(self.rows.len() - 1));
        }
    }
}
