use crate::criteria::{CriteriaSet, RatingBand};
use crate::scoring::{rate, CriterionScore, PillarScore, SignalScore, TopicScore};

/// Weighted sum of criterion scores, in criterion order.
pub fn aggregate(scores: &[CriterionScore]) -> f64 {
    scores.iter().map(|s| s.weighted).sum()
}

/// Weighted mean per pillar, pillars in first-seen order. Criteria without a
/// pillar are left out of the breakdown but still count in the aggregate.
pub fn pillar_breakdown(scores: &[CriterionScore]) -> Vec<PillarScore> {
    let mut pillars: Vec<PillarScore> = Vec::new();
    for score in scores {
        let Some(name) = score.pillar.as_deref() else {
            continue;
        };
        let idx = match pillars.iter().position(|p| p.pillar == name) {
            Some(idx) => idx,
            None => {
                pillars.push(PillarScore {
                    pillar: name.to_string(),
                    weight: 0.0,
                    score: 0.0,
                    criteria: 0,
                });
                pillars.len() - 1
            }
        };
        let pillar = &mut pillars[idx];
        pillar.weight += score.weight;
        // Holds the weighted sum until normalized below.
        pillar.score += score.weighted;
        pillar.criteria += 1;
    }
    for pillar in &mut pillars {
        pillar.score = if pillar.weight > 0.0 {
            pillar.score / pillar.weight
        } else {
            0.0
        };
    }
    pillars
}

/// Rolls criterion scores up into performance signals and signals into key
/// topics. Each level is a weighted mean rated on its own bands, or on the
/// aggregate bands when the set has none for that name.
pub fn group_breakdown(
    scores: &[CriterionScore],
    set: &CriteriaSet,
) -> (Vec<SignalScore>, Vec<TopicScore>) {
    // Weighted sums until normalized.
    let mut signals: Vec<SignalScore> = Vec::new();
    for score in scores {
        let Some(criterion) = set.find(&score.criterion_id) else {
            continue;
        };
        let Some(name) = criterion.performance_signal.as_deref() else {
            continue;
        };
        let idx = match signals.iter().position(|s| s.signal == name) {
            Some(idx) => idx,
            None => {
                signals.push(SignalScore {
                    signal: name.to_string(),
                    key_topic: criterion.key_topic.clone(),
                    weight: 0.0,
                    score: 0.0,
                    rating: None,
                    criteria: 0,
                });
                signals.len() - 1
            }
        };
        let signal = &mut signals[idx];
        signal.weight += score.weight;
        signal.score += score.weighted;
        signal.criteria += 1;
    }
    for signal in &mut signals {
        signal.score = weighted_mean(signal.score, signal.weight);
        signal.rating = group_rating(signal.score, set.signal_bands.get(&signal.signal), set);
    }

    let mut topics: Vec<TopicScore> = Vec::new();
    for signal in &signals {
        let Some(name) = signal.key_topic.as_deref() else {
            continue;
        };
        let idx = match topics.iter().position(|t| t.topic == name) {
            Some(idx) => idx,
            None => {
                topics.push(TopicScore {
                    topic: name.to_string(),
                    weight: 0.0,
                    score: 0.0,
                    rating: None,
                    signals: Vec::new(),
                });
                topics.len() - 1
            }
        };
        let topic = &mut topics[idx];
        topic.weight += signal.weight;
        topic.score += signal.weight * signal.score;
        topic.signals.push(signal.signal.clone());
    }
    for topic in &mut topics {
        topic.score = weighted_mean(topic.score, topic.weight);
        topic.rating = group_rating(topic.score, set.topic_bands.get(&topic.topic), set);
    }
    (signals, topics)
}

fn weighted_mean(sum: f64, weight: f64) -> f64 {
    if weight > 0.0 {
        sum / weight
    } else {
        0.0
    }
}

fn group_rating(score: f64, bands: Option<&Vec<RatingBand>>, set: &CriteriaSet) -> Option<String> {
    let bands = bands.map(Vec::as_slice).unwrap_or(&set.bands);
    rate(score, bands).map(|band| band.label.clone())
}
