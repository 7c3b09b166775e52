use super::segment::{Segment, SegmentKind};
use std::collections::{BTreeSet, HashMap};

pub const VIEW_LINE_HEIGHT_PX: usize = 20;
pub const VIEW_MAX_HEIGHT_PX: usize = 400;

/// External structured-text view. The pool owns creation and disposal; the
/// widget behind the trait owns rendering.
pub trait CodeView {
    fn set_content(&mut self, content: &str);
    fn set_height(&mut self, height_px: usize);
    /// Release the external resource. Called exactly once, by the pool.
    fn dispose(&mut self);
}

pub trait ViewFactory {
    type View: CodeView;
    fn create_view(&mut self, content: &str, language: Option<&str>, height_px: usize)
        -> Self::View;
}

/// Sizing rule for a code view: one line of content per 20px, capped.
pub fn view_height_px(content: &str) -> usize {
    let line_count = content.lines().count().max(1);
    (line_count * VIEW_LINE_HEIGHT_PX).min(VIEW_MAX_HEIGHT_PX)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub to_create: Vec<usize>,
    pub to_update: Vec<usize>,
    pub to_dispose: Vec<usize>,
}

/// Pure id-set diff between the currently live views and the latest segment
/// list: create the new ids, update the surviving ones, dispose the rest.
pub fn reconcile_plan(old_ids: &BTreeSet<usize>, new_ids: &BTreeSet<usize>) -> ReconcilePlan {
    ReconcilePlan {
        to_create: new_ids.difference(old_ids).copied().collect(),
        to_update: new_ids.intersection(old_ids).copied().collect(),
        to_dispose: old_ids.difference(new_ids).copied().collect(),
    }
}

/// Sole owner of the `segment id -> view` mapping. One view per code segment
/// id, never two; a view outlives a re-render only while its id stays in the
/// latest segment list.
pub struct ViewPool<F: ViewFactory> {
    factory: F,
    views: HashMap<usize, F::View>,
}

impl<F: ViewFactory> ViewPool<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            views: HashMap::new(),
        }
    }

    /// Bring the live views in line with the latest segment list.
    pub fn reconcile(&mut self, segments: &[Segment]) {
        let old_ids: BTreeSet<usize> = self.views.keys().copied().collect();
        let mut new_ids = BTreeSet::new();
        let mut code: HashMap<usize, (&str, Option<&str>)> = HashMap::new();
        for segment in segments {
            if let SegmentKind::Code { content, language } = &segment.kind {
                new_ids.insert(segment.id);
                code.insert(segment.id, (content.as_str(), language.as_deref()));
            }
        }

        let plan = reconcile_plan(&old_ids, &new_ids);
        for id in &plan.to_create {
            let (content, language) = code[id];
            let view = self
                .factory
                .create_view(content, language, view_height_px(content));
            self.views.insert(*id, view);
        }
        for id in &plan.to_update {
            let (content, _) = code[id];
            let view = self.views.get_mut(id).expect("updated id must be live");
            view.set_content(content);
            view.set_height(view_height_px(content));
        }
        for id in &plan.to_dispose {
            if let Some(mut view) = self.views.remove(id) {
                view.dispose();
            }
        }
    }

    /// Release every pooled view, e.g. when the streaming view is closed.
    pub fn dispose_all(&mut self) {
        for (_, mut view) in self.views.drain() {
            view.dispose();
        }
    }

    pub fn get(&self, id: usize) -> Option<&F::View> {
        self.views.get(&id)
    }

    pub fn ids(&self) -> BTreeSet<usize> {
        self.views.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
