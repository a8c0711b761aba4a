use crate::engine::events::{EventKind, ListenerId, MapEvent};
use crate::engine::expr::Expr;
use crate::engine::feature::{Feature, FeatureId};
use crate::engine::map::Map;
use crate::engine::style::PropertyKind;
use std::cell::RefCell;
use std::rc::Rc;

/// Property value applied to hovered features
#[derive(Clone)]
pub enum HoverValue {
    Fixed(Expr),
    /// Computed from the layer's base value once it is known
    Derived(Rc<dyn Fn(&Expr) -> Expr>),
}

impl HoverValue {
    /// Multiply a numeric base value
    pub fn scale(factor: f64) -> Self {
        HoverValue::Derived(Rc::new(move |base: &Expr| match base.as_number_literal() {
            Some(n) => Expr::number(n * factor),
            None => base.clone(),
        }))
    }

    fn resolve(&self, base: &Expr) -> Expr {
        match self {
            HoverValue::Fixed(value) => value.clone(),
            HoverValue::Derived(f) => f(base),
        }
    }
}

struct HoverState {
    base: Option<Expr>,
    hover: Option<Expr>,
}

/// Highlights hovered features of one layer by overriding a layout or paint
/// property for exactly their ids. The highlight is dropped on mouse leave
/// and whenever a camera move starts.
pub struct HoverHighlight {
    listeners: Vec<ListenerId>,
    capture: Rc<RefCell<Vec<ListenerId>>>,
}

impl HoverHighlight {
    pub fn attach(map: &mut Map, layer: &str, kind: PropertyKind, property: &str, value: HoverValue) -> Self {
        let state = Rc::new(RefCell::new(HoverState { base: None, hover: None }));
        let capture: Rc<RefCell<Vec<ListenerId>>> = Rc::new(RefCell::new(Vec::new()));

        let try_capture = {
            let state = state.clone();
            let (layer, property) = (layer.to_string(), property.to_string());
            move |map: &Map| -> bool {
                let Some(base) = map.get_property(&layer, kind, &property) else {
                    return false;
                };
                let mut state = state.borrow_mut();
                state.hover = Some(value.resolve(&base));
                state.base = Some(base);
                true
            }
        };

        // The layer may not exist yet; retry on every data or style update until it does
        if !try_capture(&*map) {
            let try_capture = Rc::new(try_capture);
            for kind in [EventKind::SourceData, EventKind::StyleData] {
                let (pending, try_capture) = (capture.clone(), try_capture.clone());
                let id = map.on(kind, move |map, _| {
                    if (*try_capture)(&*map) {
                        let ids: Vec<ListenerId> = pending.borrow_mut().drain(..).collect();
                        for id in ids {
                            map.off(id);
                        }
                    }
                });
                capture.borrow_mut().push(id);
            }
        }

        let enter = {
            let state = state.clone();
            let (layer_id, property) = (layer.to_string(), property.to_string());
            map.on_layer(EventKind::MouseEnter, layer, move |map, event| {
                let ids: Vec<FeatureId> = event.features.iter().filter_map(|f| f.id.clone()).collect();
                if ids.is_empty() {
                    return;
                }
                let state = state.borrow();
                let (Some(base), Some(hover)) = (&state.base, &state.hover) else {
                    return;
                };
                let expr = Expr::id_case(ids, hover.clone(), base.clone());
                map.set_property(&layer_id, kind, &property, Some(expr));
            })
        };

        let revert = {
            let (layer, property) = (layer.to_string(), property.to_string());
            move |map: &mut Map, _: &MapEvent| {
                let base = state.borrow().base.clone();
                if let Some(base) = base {
                    map.set_property(&layer, kind, &property, Some(base));
                }
            }
        };
        let leave = map.on_layer(EventKind::MouseLeave, layer, revert.clone());
        let move_start = map.on(EventKind::MoveStart, revert);

        Self {
            listeners: vec![enter, leave, move_start],
            capture,
        }
    }

    /// Remove every listener this highlight registered
    pub fn detach(self, map: &mut Map) {
        for id in self.listeners {
            map.off(id);
        }
        let pending: Vec<ListenerId> = self.capture.borrow_mut().drain(..).collect();
        for id in pending {
            map.off(id);
        }
    }
}

/// Forwards clicks on a layer's features to a handler
pub struct ClickForward {
    listener: ListenerId,
}

impl ClickForward {
    pub fn attach(map: &mut Map, layer: &str, mut handler: impl FnMut(&mut Map, &[Feature]) + 'static) -> Self {
        let listener = map.on_layer(EventKind::Click, layer, move |map, event| handler(map, &event.features));
        Self { listener }
    }

    pub fn detach(self, map: &mut Map) {
        map.off(self.listener);
    }
}

/// Anything attached to the map that must be removed with its owner
pub enum Attachment {
    Hover(HoverHighlight),
    Click(ClickForward),
}

impl Attachment {
    pub fn detach(self, map: &mut Map) {
        match self {
            Attachment::Hover(h) => h.detach(map),
            Attachment::Click(c) => c.detach(map),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::map::tests::{point_collection, test_map};
    use crate::engine::style::{Layer, LayerKind, SourceData};

    fn venues_map() -> Map {
        let (mut map, _) = test_map();
        map.add_source("venues", SourceData::Features(point_collection())).unwrap();
        map.add_layer(Layer::new("venues", LayerKind::Symbol, "venues").layout("icon-size", Expr::number(2.0)))
            .unwrap();
        map
    }

    fn icon_size(map: &Map) -> Option<Expr> {
        map.get_property("venues", PropertyKind::Layout, "icon-size")
    }

    #[test]
    fn test_hover_scales_only_hovered_ids() {
        let mut map = venues_map();
        let _hover = HoverHighlight::attach(
            &mut map,
            "venues",
            PropertyKind::Layout,
            "icon-size",
            HoverValue::scale(1.5),
        );

        map.pointer_move(100, 60);
        assert_eq!(
            icon_size(&map),
            Some(Expr::id_case(vec![FeatureId::new("42")], Expr::number(3.0), Expr::number(2.0)))
        );

        map.pointer_move(0, 0);
        assert_eq!(icon_size(&map), Some(Expr::number(2.0)));
    }

    #[test]
    fn test_move_start_reverts_highlight() {
        let mut map = venues_map();
        let _hover = HoverHighlight::attach(
            &mut map,
            "venues",
            PropertyKind::Paint,
            "text-opacity",
            HoverValue::Fixed(Expr::number(1.0)),
        );
        // Base not set on the layer yet: nothing to capture
        map.pointer_move(100, 60);
        assert_eq!(map.get_property("venues", PropertyKind::Paint, "text-opacity"), None);

        map.set_property("venues", PropertyKind::Paint, "text-opacity", Some(Expr::number(0.0)));
        map.set_data("venues", SourceData::Features(point_collection()));
        map.pointer_leave();
        map.pointer_move(100, 60);
        assert!(matches!(
            map.get_property("venues", PropertyKind::Paint, "text-opacity"),
            Some(Expr::IdCase { .. })
        ));

        map.begin_gesture();
        assert_eq!(
            map.get_property("venues", PropertyKind::Paint, "text-opacity"),
            Some(Expr::number(0.0))
        );
    }

    #[test]
    fn test_capture_listener_removes_itself() {
        let (mut map, _) = test_map();
        let hover = HoverHighlight::attach(
            &mut map,
            "venues",
            PropertyKind::Layout,
            "icon-size",
            HoverValue::scale(1.5),
        );
        assert_eq!(map.listener_count(EventKind::SourceData, None), 1);
        assert_eq!(map.listener_count(EventKind::StyleData, None), 1);

        map.add_source("venues", SourceData::Empty).unwrap();
        // Source exists but the layer does not: still waiting
        assert_eq!(map.listener_count(EventKind::SourceData, None), 1);

        // Adding the layer resolves the base value without further data
        map.add_layer(Layer::new("venues", LayerKind::Symbol, "venues").layout("icon-size", Expr::number(2.0)))
            .unwrap();
        assert_eq!(map.listener_count(EventKind::SourceData, None), 0);
        assert_eq!(map.listener_count(EventKind::StyleData, None), 0);

        hover.detach(&mut map);
        assert_eq!(map.listener_count(EventKind::MoveStart, None), 0);
        assert_eq!(map.listener_count(EventKind::MouseEnter, Some("venues")), 0);
    }

    #[test]
    fn test_click_forward_and_detach() {
        let mut map = venues_map();
        let clicked = Rc::new(RefCell::new(Vec::new()));
        let sink = clicked.clone();
        let click = ClickForward::attach(&mut map, "venues", move |_, features| {
            sink.borrow_mut().extend(features.iter().filter_map(|f| f.id.clone()));
        });

        map.click(100, 60);
        assert_eq!(*clicked.borrow(), vec![FeatureId::new("42")]);

        Attachment::Click(click).detach(&mut map);
        map.click(100, 60);
        assert_eq!(clicked.borrow().len(), 1);
    }
}
