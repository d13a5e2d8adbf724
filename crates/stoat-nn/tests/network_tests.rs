// Integration tests for the layer chain and the network orchestrator.
//
// Reference values are computed inline with the same f32 formulas the engine
// uses, so the assertions pin behavior rather than a rounded constant.

use stoat_core::{Activation, Error, Format, PoolKind, RngContext, Tensor};
use stoat_data::DataSpace;
use stoat_nn::{same_classification, FullyConnected, Layer, LayerKind, Network, TrainConfig};

fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() < tol
}

fn assert_vec_approx(got: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(got.len(), expected.len(), "length mismatch");
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            approx_eq(*g, *e, tol),
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

fn sigma(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn fc_ref(layer: &Layer) -> &FullyConnected {
    match layer.kind() {
        LayerKind::FullyConnected(fc) => fc,
        _ => panic!("expected a fully-connected layer"),
    }
}

fn fc_mut(layer: &mut Layer) -> &mut FullyConnected {
    match layer.kind_mut() {
        LayerKind::FullyConnected(fc) => fc,
        _ => panic!("expected a fully-connected layer"),
    }
}

// Layer state machine

#[test]
fn test_unbound_layer_fails() {
    let mut layer = Layer::fully_connected(3, Activation::Sigmoid).unwrap();
    let input = Tensor::zeros((2, 2, 1)).unwrap();
    assert!(matches!(
        layer.forward_propagation(&input.view()),
        Err(Error::Uninitialized(_))
    ));
    assert!(layer.activations().is_err());
}

#[test]
fn test_bind_allocates_weights_and_error() {
    let mut layer = Layer::fully_connected(3, Activation::Sigmoid).unwrap();
    layer.set_input_format(Format::new(2, 2, 1)).unwrap();
    assert_eq!(layer.activation_format().unwrap(), Format::column(3));
    assert_eq!(layer.error().unwrap().format(), Format::column(3));
    // weights: (input_count, neuron_count, 1) = (4, 3, 1)
    assert_eq!(
        fc_ref(&layer).weights().unwrap().format(),
        Format::new(4, 3, 1)
    );
}

#[test]
fn test_forward_rejects_wrong_input_format() {
    let mut layer = Layer::fully_connected(3, Activation::Sigmoid).unwrap();
    layer.set_input_format(Format::new(2, 2, 1)).unwrap();
    let wrong = Tensor::zeros((4, 1, 1)).unwrap();
    assert!(matches!(
        layer.forward_propagation(&wrong.view()),
        Err(Error::FormatMismatch { .. })
    ));
}

// Fully-connected backward — hand-derived single neuron

#[test]
fn test_fc_backward_single_neuron_reference() {
    // weight = 1, bias = 0, input = 1, upstream error = 1 (via a label with
    // 2·(a − label) = 1): the bias delta must equal the sigmoid slope at the
    // recovered pre-activation, the weight delta the same times the input.
    let mut layer = Layer::fully_connected(1, Activation::Sigmoid).unwrap();
    layer.set_input_format(Format::new(1, 1, 1)).unwrap();
    fc_mut(&mut layer)
        .weights_mut()
        .unwrap()
        .set_flat(0, 1.0)
        .unwrap();

    let input = Tensor::from_slice((1, 1, 1), &[1.0]).unwrap();
    layer.forward_propagation(&input.view()).unwrap();
    let a = layer.activations().unwrap().get_flat(0).unwrap();
    assert!(approx_eq(a, sigma(1.0), 1e-6));

    let label = Tensor::from_slice((1, 1, 1), &[a - 0.5]).unwrap();
    layer.set_error_from_label(&label.view()).unwrap();

    let mut passing = Tensor::zeros((1, 1, 1)).unwrap();
    layer
        .back_propagation(&input.view(), Some(&mut passing))
        .unwrap();

    // derivative at σ⁻¹(a): σ(1)·(1 − σ(1)) ≈ 0.19661193
    let expected = 0.196_611_93;
    let fc = fc_ref(&layer);
    assert!(approx_eq(fc.bias_deltas().get_flat(0).unwrap(), expected, 1e-4));
    assert!(approx_eq(
        fc.weight_deltas().unwrap().get_flat(0).unwrap(),
        expected,
        1e-4
    ));
    // passing error: e·d·w with w = 1
    assert!(approx_eq(passing.get_flat(0).unwrap(), expected, 1e-4));
    // the consumed error slot must be zero again
    assert_eq!(layer.error().unwrap().get_flat(0).unwrap(), 0.0);
}

#[test]
fn test_apply_deltas_steps_and_resets() {
    let mut layer = Layer::fully_connected(1, Activation::Sigmoid).unwrap();
    layer.set_input_format(Format::new(1, 1, 1)).unwrap();
    fc_mut(&mut layer)
        .weights_mut()
        .unwrap()
        .set_flat(0, 1.0)
        .unwrap();

    let input = Tensor::from_slice((1, 1, 1), &[1.0]).unwrap();
    layer.forward_propagation(&input.view()).unwrap();
    let a = layer.activations().unwrap().get_flat(0).unwrap();
    let label = Tensor::from_slice((1, 1, 1), &[a - 0.5]).unwrap();
    layer.set_error_from_label(&label.view()).unwrap();
    layer.back_propagation(&input.view(), None).unwrap();

    let wd = fc_ref(&layer).weight_deltas().unwrap().get_flat(0).unwrap();
    let bd = fc_ref(&layer).bias_deltas().get_flat(0).unwrap();
    assert!(wd != 0.0 && bd != 0.0);

    // batch of 2, learning rate 0.5: param -= 0.5 · (delta / 2)
    layer.apply_deltas(2, 0.5).unwrap();
    let fc = fc_ref(&layer);
    assert!(approx_eq(
        fc.weights().unwrap().get_flat(0).unwrap(),
        1.0 - (wd / 2.0) * 0.5,
        1e-7
    ));
    assert!(approx_eq(
        fc.biases().get_flat(0).unwrap(),
        0.0 - (bd / 2.0) * 0.5,
        1e-7
    ));
    assert_eq!(fc.weight_deltas().unwrap().get_flat(0).unwrap(), 0.0);
    assert_eq!(fc.bias_deltas().get_flat(0).unwrap(), 0.0);
}

// Convolutional layer

#[test]
fn test_conv_output_side_formula() {
    let mut net = Network::new();
    net.set_input_format((4, 4, 1)).unwrap();
    net.add_convolutional(3, 2, 2, Activation::Relu).unwrap();
    assert_eq!(
        net.layer(0).unwrap().activation_format().unwrap(),
        Format::new(2, 2, 3)
    );

    // input side 5 with kernel 2, stride 2 is not tileable
    let mut bad = Network::new();
    bad.set_input_format((5, 5, 1)).unwrap();
    assert!(matches!(
        bad.add_convolutional(3, 2, 2, Activation::Relu),
        Err(Error::NonIntegralOutput { .. })
    ));
}

#[test]
fn test_conv_rejects_bad_hyperparameters() {
    assert!(Layer::convolutional(0, 2, 1, Activation::Relu).is_err());
    assert!(Layer::convolutional(1, 0, 1, Activation::Relu).is_err());
    assert!(Layer::convolutional(1, 2, 0, Activation::Relu).is_err());
    // stride must not exceed the kernel size
    assert!(Layer::convolutional(1, 2, 3, Activation::Relu).is_err());
    assert!(Layer::convolutional(1, 2, 2, Activation::Relu).is_ok());
}

#[test]
fn test_conv_forward_reference() {
    let mut net = Network::new();
    net.set_input_format((4, 4, 1)).unwrap();
    net.add_convolutional(1, 2, 2, Activation::Relu).unwrap();
    net.set_all_parameter(1.0).unwrap();

    let input = Tensor::from_slice(
        (4, 4, 1),
        &[
            1.0, 2.0, 3.0, 4.0, //
            5.0, 6.0, 7.0, 8.0, //
            9.0, 10.0, 11.0, 12.0, //
            13.0, 14.0, 15.0, 16.0,
        ],
    )
    .unwrap();
    net.forward_propagation(&input.view()).unwrap();
    // window sums + bias 1, relu is the identity on positive values
    assert_vec_approx(
        &net.output().unwrap().to_vec().unwrap(),
        &[15.0, 23.0, 47.0, 55.0],
        1e-6,
    );
}

#[test]
fn test_conv_backward_reference() {
    // One 2×2 kernel over a 2×2 input, stride 2: a single sigmoid output.
    let mut net = Network::new();
    net.set_input_format((2, 2, 1)).unwrap();
    net.set_output_format((1, 1, 1)).unwrap();
    net.add_convolutional(1, 2, 2, Activation::Sigmoid).unwrap();
    net.set_all_parameter(0.5).unwrap();

    let data = Tensor::from_slice((2, 2, 1), &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let label = Tensor::from_slice((1, 1, 1), &[0.0]).unwrap();
    net.learn_once(&data.view(), &label.view(), true, 1.0)
        .unwrap();

    // reference with the engine's own formulas
    let z = 0.5 * (1.0 + 2.0 + 3.0 + 4.0) + 0.5;
    let a = sigma(z);
    let err = 2.0 * (a - 0.0);
    let pre = (a / (1.0 - a)).ln();
    let local = err * sigma(pre) * (1.0 - sigma(pre));
    let expected_weights: Vec<f32> = [1.0f32, 2.0, 3.0, 4.0]
        .iter()
        .map(|x| 0.5 - local * x)
        .collect();

    let LayerKind::Convolutional(conv) = net.layer(0).unwrap().kind() else {
        panic!("expected a convolutional layer");
    };
    assert_vec_approx(
        &conv.kernels()[0].to_vec().unwrap(),
        &expected_weights,
        1e-5,
    );
    assert!(approx_eq(
        conv.biases().get_flat(0).unwrap(),
        0.5 - local,
        1e-5
    ));
}

// Pooling layer

#[test]
fn test_pooling_forward_and_max_routing() {
    let mut layer = Layer::pooling(2, 2, PoolKind::Max).unwrap();
    layer.set_input_format(Format::new(2, 2, 1)).unwrap();

    let input = Tensor::from_slice((2, 2, 1), &[1.0, 5.0, 3.0, 7.0]).unwrap();
    layer.forward_propagation(&input.view()).unwrap();
    assert_eq!(layer.activations().unwrap().to_vec().unwrap(), vec![7.0]);

    // label 5 → seeded error 2·(7 − 5) = 4, routed to the arg-max slot
    let label = Tensor::from_slice((1, 1, 1), &[5.0]).unwrap();
    layer.set_error_from_label(&label.view()).unwrap();
    let mut passing = Tensor::zeros((2, 2, 1)).unwrap();
    layer
        .back_propagation(&input.view(), Some(&mut passing))
        .unwrap();
    assert_eq!(passing.to_vec().unwrap(), vec![0.0, 0.0, 0.0, 4.0]);
    assert_eq!(layer.error().unwrap().to_vec().unwrap(), vec![0.0]);
}

#[test]
fn test_pooling_average_splits_error() {
    let mut layer = Layer::pooling(2, 2, PoolKind::Average).unwrap();
    layer.set_input_format(Format::new(2, 2, 1)).unwrap();

    let input = Tensor::from_slice((2, 2, 1), &[1.0, 5.0, 3.0, 7.0]).unwrap();
    layer.forward_propagation(&input.view()).unwrap();
    assert_eq!(layer.activations().unwrap().to_vec().unwrap(), vec![4.0]);

    let label = Tensor::from_slice((1, 1, 1), &[5.0]).unwrap();
    layer.set_error_from_label(&label.view()).unwrap(); // error = −2
    let mut passing = Tensor::zeros((2, 2, 1)).unwrap();
    layer
        .back_propagation(&input.view(), Some(&mut passing))
        .unwrap();
    assert_eq!(passing.to_vec().unwrap(), vec![-0.5, -0.5, -0.5, -0.5]);
}

#[test]
fn test_pooling_is_not_a_parameter_layer() {
    let mut net = Network::new();
    net.set_input_format((4, 4, 2)).unwrap();
    net.add_convolutional(2, 2, 2, Activation::Relu).unwrap();
    net.add_pooling(2, 2, PoolKind::Max).unwrap();
    net.add_fully_connected(3, Activation::Sigmoid).unwrap();
    assert_eq!(net.parameter_layer_indices(), &[0, 2]);
}

// Network state machine

#[test]
fn test_formats_set_at_most_once() {
    let mut net = Network::new();
    net.set_input_format((2, 2, 1)).unwrap();
    assert!(net.set_input_format((2, 2, 1)).is_err());
    net.set_output_format((1, 1, 1)).unwrap();
    assert!(net.set_output_format((1, 1, 1)).is_err());
}

#[test]
fn test_add_layer_requires_input_format() {
    let mut net = Network::new();
    assert!(matches!(
        net.add_fully_connected(3, Activation::Sigmoid),
        Err(Error::Uninitialized(_))
    ));
}

#[test]
fn test_forward_requires_layers_and_matching_format() {
    let mut net = Network::new();
    net.set_input_format((2, 2, 1)).unwrap();
    let input = Tensor::zeros((2, 2, 1)).unwrap();
    assert!(matches!(
        net.forward_propagation(&input.view()),
        Err(Error::Uninitialized(_))
    ));

    net.add_fully_connected(2, Activation::Sigmoid).unwrap();
    let wrong = Tensor::zeros((1, 4, 1)).unwrap();
    assert!(matches!(
        net.forward_propagation(&wrong.view()),
        Err(Error::FormatMismatch { .. })
    ));
}

#[test]
fn test_mutate_without_parameter_layers_fails() {
    let mut rng = RngContext::from_seed(1);
    let mut net = Network::new();
    assert!(net.mutate(0.1, &mut rng).is_err());

    net.set_input_format((4, 4, 1)).unwrap();
    net.add_pooling(2, 2, PoolKind::Max).unwrap();
    assert!(matches!(
        net.mutate(0.1, &mut rng),
        Err(Error::Uninitialized(_))
    ));
}

// Whole-network properties

fn all_parameters(net: &Network) -> Vec<f32> {
    let mut params = Vec::new();
    for i in 0..net.layer_count() {
        match net.layer(i).unwrap().kind() {
            LayerKind::FullyConnected(fc) => {
                params.extend(fc.weights().unwrap().to_vec().unwrap());
                params.extend(fc.biases().to_vec().unwrap());
            }
            LayerKind::Convolutional(conv) => {
                for kernel in conv.kernels() {
                    params.extend(kernel.to_vec().unwrap());
                }
                params.extend(conv.biases().to_vec().unwrap());
            }
            LayerKind::Pooling(_) => {}
        }
    }
    params
}

#[test]
fn test_mutate_changes_exactly_one_scalar() {
    let mut rng = RngContext::from_seed(77);
    let mut net = Network::new();
    net.set_input_format((4, 4, 1)).unwrap();
    net.add_convolutional(2, 2, 2, Activation::Relu).unwrap();
    net.add_fully_connected(5, Activation::Sigmoid).unwrap();
    net.apply_noise(0.5, &mut rng).unwrap();

    for _ in 0..10 {
        let before = all_parameters(&net);
        net.mutate(0.25, &mut rng).unwrap();
        let after = all_parameters(&net);
        let changed = before
            .iter()
            .zip(after.iter())
            .filter(|(b, a)| b.to_bits() != a.to_bits())
            .count();
        assert_eq!(changed, 1);
    }
}

#[test]
fn test_forward_propagation_is_deterministic() {
    let mut rng = RngContext::from_seed(13);
    let mut net = Network::new();
    net.set_input_format((4, 4, 1)).unwrap();
    net.add_convolutional(2, 2, 2, Activation::Relu).unwrap();
    net.add_fully_connected(3, Activation::Sigmoid).unwrap();
    net.apply_noise(0.5, &mut rng).unwrap();

    let input = Tensor::from_slice((4, 4, 1), &(0..16).map(|i| i as f32 / 16.0).collect::<Vec<_>>())
        .unwrap();
    net.forward_propagation(&input.view()).unwrap();
    let first = net.output().unwrap().to_vec().unwrap();
    net.forward_propagation(&input.view()).unwrap();
    let second = net.output().unwrap().to_vec().unwrap();
    assert_eq!(first, second);
}

// End to end: one batch on a single sigmoid neuron, reference-checked

#[test]
fn test_end_to_end_single_batch_update() {
    let mut net = Network::new();
    net.set_input_format((2, 2, 1)).unwrap();
    net.set_output_format((1, 1, 1)).unwrap();
    net.add_output_fully_connected(Activation::Sigmoid).unwrap();
    net.set_all_parameter(0.5).unwrap();

    let examples: [([f32; 4], f32); 2] = [([1.0, 0.0, 0.0, 1.0], 1.0), ([0.0, 1.0, 1.0, 0.0], 0.0)];
    let data: Vec<Tensor> = examples
        .iter()
        .map(|(d, _)| Tensor::from_slice((2, 2, 1), d).unwrap())
        .collect();
    let labels: Vec<Tensor> = examples
        .iter()
        .map(|(_, l)| Tensor::from_slice((1, 1, 1), &[*l]).unwrap())
        .collect();
    let mut set = DataSpace::new((2, 2, 1), (1, 1, 1), &data, &labels).unwrap();

    let config = TrainConfig {
        batch_size: 2,
        epochs: 1,
        learning_rate: 0.5,
    };
    let mut rng = RngContext::from_seed(3);
    net.learn(&mut set, &config, &mut rng).unwrap();

    // Reference: accumulate both examples' deltas with the engine's own
    // formulas, then one averaged update. The two contributions are summed,
    // so the shuffle order cannot change the result.
    let mut weight_deltas = [0.0f32; 4];
    let mut bias_delta = 0.0f32;
    for (d, l) in &examples {
        let z = d.iter().map(|x| 0.5 * x).sum::<f32>() + 0.5;
        let a = sigma(z);
        let err = 2.0 * (a - l);
        let pre = (a / (1.0 - a)).ln();
        let local = err * sigma(pre) * (1.0 - sigma(pre));
        bias_delta += local;
        for (j, x) in d.iter().enumerate() {
            weight_deltas[j] += local * x;
        }
    }
    let expected_weights: Vec<f32> = weight_deltas
        .iter()
        .map(|d| 0.5 - (d / 2.0) * 0.5)
        .collect();
    let expected_bias = 0.5 - (bias_delta / 2.0) * 0.5;

    let fc = fc_ref(net.layer(0).unwrap());
    assert_vec_approx(
        &fc.weights().unwrap().to_vec().unwrap(),
        &expected_weights,
        1e-6,
    );
    assert!(approx_eq(
        fc.biases().get_flat(0).unwrap(),
        expected_bias,
        1e-6
    ));
    // accumulators are clear again after the batch
    assert!(fc
        .weight_deltas()
        .unwrap()
        .to_vec()
        .unwrap()
        .iter()
        .all(|&d| d == 0.0));
}

#[test]
fn test_learn_validates_set_formats() {
    let mut net = Network::new();
    net.set_input_format((2, 2, 1)).unwrap();
    net.set_output_format((1, 1, 1)).unwrap();
    net.add_output_fully_connected(Activation::Sigmoid).unwrap();

    let data = vec![Tensor::zeros((2, 1, 1)).unwrap()];
    let labels = vec![Tensor::zeros((1, 1, 1)).unwrap()];
    let mut set = DataSpace::new((2, 1, 1), (1, 1, 1), &data, &labels).unwrap();
    let mut rng = RngContext::from_seed(1);
    assert!(matches!(
        net.learn(&mut set, &TrainConfig::default(), &mut rng),
        Err(Error::FormatMismatch { .. })
    ));

    let bad_batch = TrainConfig {
        batch_size: 0,
        ..TrainConfig::default()
    };
    let data = vec![Tensor::zeros((2, 2, 1)).unwrap()];
    let labels = vec![Tensor::zeros((1, 1, 1)).unwrap()];
    let mut set = DataSpace::new((2, 2, 1), (1, 1, 1), &data, &labels).unwrap();
    assert!(matches!(
        net.learn(&mut set, &bad_batch, &mut rng),
        Err(Error::InvalidHyperparameter(_))
    ));
}

#[test]
fn test_test_reports_accuracy_and_cost() {
    let mut net = Network::new();
    net.set_input_format((1, 2, 1)).unwrap();
    net.set_output_format(Format::column(2)).unwrap();
    net.add_output_fully_connected(Activation::Sigmoid).unwrap();

    // identity-ish weights: neuron 0 looks at input 0, neuron 1 at input 1
    let fc = fc_mut(net.layer_mut(0).unwrap());
    let weights = fc.weights_mut().unwrap();
    weights.set_flat(0, 4.0).unwrap();
    weights.set_flat(3, 4.0).unwrap();

    let data = vec![
        Tensor::from_slice((1, 2, 1), &[1.0, 0.0]).unwrap(),
        Tensor::from_slice((1, 2, 1), &[0.0, 1.0]).unwrap(),
    ];
    let labels = vec![
        Tensor::from_slice((1, 2, 1), &[1.0, 0.0]).unwrap(),
        Tensor::from_slice((1, 2, 1), &[0.0, 1.0]).unwrap(),
    ];
    let set = DataSpace::new((1, 2, 1), (1, 2, 1), &data, &labels).unwrap();

    let result = net.test(&set, same_classification).unwrap();
    assert_eq!(result.data_count, 2);
    assert!(approx_eq(result.accuracy, 1.0, 1e-6));
    assert!(result.avg_cost.is_finite());
}

// A deeper stack: conv → pool → fully-connected, trained end to end

#[test]
fn test_full_stack_trains_without_error() {
    let mut net = Network::new();
    net.set_input_format((4, 4, 1)).unwrap();
    net.set_output_format(Format::column(2)).unwrap();
    net.add_convolutional(2, 2, 1, Activation::Relu).unwrap(); // → (3, 3, 2)
    net.add_pooling(3, 3, PoolKind::Max).unwrap(); // → (1, 1, 2)
    net.add_fully_connected(4, Activation::Sigmoid).unwrap();
    net.add_output_fully_connected(Activation::Sigmoid).unwrap();

    let mut rng = RngContext::from_seed(99);
    net.apply_noise(0.5, &mut rng).unwrap();

    let mut data = Vec::new();
    let mut labels = Vec::new();
    for i in 0..8 {
        let mut t = Tensor::zeros((4, 4, 1)).unwrap();
        t.set_flat(i, 1.0).unwrap();
        data.push(t);
        let class = [if i % 2 == 0 { 1.0 } else { 0.0 }, if i % 2 == 0 { 0.0 } else { 1.0 }];
        labels.push(Tensor::from_slice((1, 2, 1), &class).unwrap());
    }
    let mut set = DataSpace::new((4, 4, 1), (1, 2, 1), &data, &labels).unwrap();

    let config = TrainConfig {
        batch_size: 4,
        epochs: 3,
        learning_rate: 0.2,
    };
    net.learn(&mut set, &config, &mut rng).unwrap();

    let result = net.test(&set, same_classification).unwrap();
    assert_eq!(result.data_count, 8);
    assert!(result.avg_cost.is_finite());
}
