//! A fixed-size set of scratch cards sampled from the catalog.
//!
//! The collection owns persistence of the scratch session: every card state
//! change and every finished stroke writes the whole session back through the
//! [`DurableStore`]. The revealed counter only moves on a card's one-shot
//! [`Transition::Revealed`], so it never decreases and never double counts.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use scratchboard_shared::CatalogItem;
use scratchboard_store::DurableStore;

use crate::card::{CardSettings, ScratchCard, Transition};
use crate::session::SessionRecord;

pub struct CardCollection {
    cards: Vec<ScratchCard>,
    source: Vec<CatalogItem>,
    sample_size: usize,
    settings: CardSettings,
    store: Option<DurableStore>,
    rng: StdRng,
    revealed_count: usize,
    source_changed: bool,
}

impl CardCollection {
    /// An empty collection. `store` is where the session is persisted; pass
    /// `None` for a purely in-memory collection.
    pub fn new(settings: CardSettings, store: Option<DurableStore>) -> Self {
        Self {
            cards: Vec::new(),
            source: Vec::new(),
            sample_size: 0,
            settings,
            store,
            rng: StdRng::from_entropy(),
            revealed_count: 0,
            source_changed: false,
        }
    }

    /// Replace the sampling RNG, e.g. with a seeded one.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Build `sample_size` cards from `source_items`.
    ///
    /// A saved session of the same size is restored (cards keep their saved
    /// ids, progress and revealed flag). Otherwise a uniform sample without
    /// replacement is drawn; when the source is smaller than the sample the
    /// remaining cards have no content.
    pub fn initialize(&mut self, sample_size: usize, source_items: Vec<CatalogItem>) {
        self.sample_size = sample_size;
        self.source = source_items;
        self.source_changed = false;

        if let Some(session) = self.store.as_ref().and_then(SessionRecord::load) {
            if session.cards.len() == sample_size {
                self.restore(&session);
                return;
            }
            debug!(
                saved = session.cards.len(),
                sample_size, "Saved session size differs, sampling fresh"
            );
        }

        self.sample();
    }

    /// Draw a new sample from the current source with fresh masks. Any
    /// in-flight stroke is discarded.
    pub fn reset(&mut self) {
        self.source_changed = false;
        self.sample();
    }

    /// Record a new source catalog. Existing cards are untouched; the next
    /// [`reset`](Self::reset) samples from it.
    pub fn set_source(&mut self, items: Vec<CatalogItem>) {
        self.source = items;
        self.source_changed = true;
        debug!(items = self.source.len(), "Card source catalog changed");
    }

    /// Whether the source changed since the cards were last sampled.
    pub fn source_changed(&self) -> bool {
        self.source_changed
    }

    pub fn source(&self) -> &[CatalogItem] {
        &self.source
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed_count
    }

    pub fn cards(&self) -> &[ScratchCard] {
        &self.cards
    }

    pub fn card(&self, index: usize) -> Option<&ScratchCard> {
        self.cards.get(index)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn settings(&self) -> &CardSettings {
        &self.settings
    }

    pub fn begin_stroke(&mut self, index: usize, x: f32, y: f32) -> bool {
        self.cards
            .get_mut(index)
            .map(|card| card.begin_stroke(x, y))
            .unwrap_or(false)
    }

    pub fn continue_stroke(&mut self, index: usize, x: f32, y: f32) -> Option<Transition> {
        let transition = self.cards.get_mut(index)?.continue_stroke(x, y);
        if let Some(transition) = transition {
            self.apply(index, transition);
        }
        transition
    }

    pub fn end_stroke(&mut self, index: usize) -> Option<Transition> {
        let card = self.cards.get_mut(index)?;
        if !card.stroke_active() {
            return None;
        }
        let transition = card.end_stroke();
        match transition {
            Some(transition) => self.apply(index, transition),
            None => self.persist(),
        }
        transition
    }

    pub fn cancel_stroke(&mut self, index: usize) -> Option<Transition> {
        self.end_stroke(index)
    }

    pub fn snapshot(&self) -> SessionRecord {
        SessionRecord::new(self.cards.iter().map(ScratchCard::serialize).collect())
    }

    fn apply(&mut self, index: usize, transition: Transition) {
        if transition == Transition::Revealed {
            self.revealed_count += 1;
            info!(
                card = index,
                revealed = self.revealed_count,
                total = self.cards.len(),
                "Card revealed"
            );
        }
        self.persist();
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            self.snapshot().save(store);
        }
    }

    fn sample(&mut self) {
        let mut picked: Vec<CatalogItem> = self
            .source
            .choose_multiple(&mut self.rng, self.sample_size)
            .cloned()
            .collect();
        picked.shuffle(&mut self.rng);

        let mut picked = picked.into_iter();
        self.cards = (0..self.sample_size)
            .map(|slot| match picked.next() {
                Some(item) => {
                    ScratchCard::with_pixel_mask(item.id.clone(), Some(item), &self.settings)
                }
                None => ScratchCard::with_pixel_mask(format!("empty-{slot}"), None, &self.settings),
            })
            .collect();
        self.revealed_count = 0;

        info!(
            cards = self.cards.len(),
            source = self.source.len(),
            "Card collection sampled"
        );
        self.persist();
    }

    fn restore(&mut self, session: &SessionRecord) {
        self.cards = session
            .cards
            .iter()
            .map(|record| {
                let content = self.source.iter().find(|item| item.id == record.id).cloned();
                ScratchCard::restore(record, content, &self.settings)
            })
            .collect();
        self.revealed_count = self.cards.iter().filter(|card| card.is_revealed()).count();

        info!(
            cards = self.cards.len(),
            revealed = self.revealed_count,
            "Card collection restored from session"
        );
    }
}
